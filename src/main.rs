use anyhow::{Context, Result};
use audio_alchemy::batch::{Batch, BatchItem, BatchObserver, BatchSummary, ItemStatus};
use audio_alchemy::capture::{CaptureBackend, StreamingCaptureEncoder};
use audio_alchemy::config::Config;
use audio_alchemy::context::ContextPool;
use audio_alchemy::export::{export_results, OUTPUT_FOLDER};
use audio_alchemy::ffmpeg_capture::FfmpegCapture;
use audio_alchemy::ffmpeg_decoder::FfmpegDecoder;
use audio_alchemy::flac_encoder::FlacEncoder;
use audio_alchemy::gemini::GeminiClient;
use audio_alchemy::lossy_encoder::{EncoderBackend, LossyEncoderAdapter};
use audio_alchemy::pipeline::ConversionPipeline;
use audio_alchemy::remote::{SpeechSynthesizer, Transcriber};
use audio_alchemy::types::{format_duration, TargetFormat, TargetSampleRate};
use audio_alchemy::wav_writer::WAV_HEADER_LEN;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Parser)]
#[command(name = "audio-alchemy", version, about = "音声ファイルの一括変換")]
struct Cli {
    /// 設定ファイルのパス
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// ファイルを変換して <output-dir>/Convertion/ に保存
    Convert {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// wav, mp3, flac, webm, ogg, aac
        #[arg(long)]
        format: Option<TargetFormat>,
        /// ビットレート (kbps)。WAV / FLAC では無視
        #[arg(long)]
        bitrate: Option<u32>,
        /// 16000, 22050, 44100, 48000
        #[arg(long)]
        sample_rate: Option<TargetSampleRate>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// 音声ファイルを文字起こし
    Transcribe {
        file: PathBuf,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// テキストから音声を合成
    Speak {
        text: String,
        #[arg(long)]
        voice: Option<String>,
        /// 出力先（拡張子が無ければ音声形式に合わせて付ける）
        #[arg(long)]
        out: PathBuf,
    },
    /// デフォルト設定ファイルを生成
    GenerateConfig {
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
    /// 変換先フォーマットとこの環境での対応状況を表示
    Formats,
}

/// 完了したアイテムを1行のJSONで標準出力に出す
struct JsonLineObserver;

impl BatchObserver for JsonLineObserver {
    fn on_progress(&mut self, item: &BatchItem) {
        log::debug!("{}: {}%", item.name, item.progress);
    }

    fn on_item_finished(&mut self, item: &BatchItem) {
        let line = serde_json::json!({
            "id": item.id,
            "name": item.name,
            "status": item.status,
            "progress": item.progress,
            "size_bytes": item.size_bytes,
            "output_bytes": item.result.as_ref().map(|r| r.bytes.len()),
            "error": item.error,
        });
        println!("{}", line);
        if item.status == ItemStatus::Error {
            log::error!("{}: {}", item.name, item.error.as_deref().unwrap_or(""));
        }
    }

    fn on_batch_complete(&mut self, summary: &BatchSummary) {
        match serde_json::to_string(summary) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("集計のシリアライズに失敗: {}", e),
        }
    }
}

fn lossy_backend() -> Option<Box<dyn EncoderBackend>> {
    #[cfg(feature = "mp3")]
    {
        Some(Box::new(audio_alchemy::lame_backend::LameBackend::new()))
    }
    #[cfg(not(feature = "mp3"))]
    {
        log::warn!("MP3 エンコーダーなしでビルドされています");
        None
    }
}

async fn build_pipeline(config: &Config) -> ConversionPipeline {
    let ffmpeg = if config.capture.enabled {
        FfmpegCapture::probe(&config.capture.ffmpeg_path).await
    } else {
        None
    };
    let ffmpeg_found = ffmpeg.is_some();
    let capture = ffmpeg.map(|c| Arc::new(c) as Arc<dyn CaptureBackend>);

    let pipeline = ConversionPipeline::new(
        ContextPool::new(config.resources.max_contexts),
        LossyEncoderAdapter::new(lossy_backend()),
        StreamingCaptureEncoder::new(capture, config.capture.realtime),
        FlacEncoder::new(config.flac.block_size),
    );

    // 同じ ffmpeg を symphonia で読めない入力のデコードにも使う
    if ffmpeg_found {
        pipeline.with_fallback_decoder(Arc::new(FfmpegDecoder::new(&config.capture.ffmpeg_path)))
    } else {
        pipeline
    }
}

/// 拡張子から入力のMIMEタイプを推定
fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "aac" => "audio/aac",
        "m4a" | "mp4" => "audio/mp4",
        _ => return None,
    };
    Some(mime)
}

/// WAVヘッダーのバイトレートから再生時間を求める
fn wav_duration_secs(wav: &[u8]) -> Option<f64> {
    let byte_rate = u32::from_le_bytes(wav.get(28..32)?.try_into().ok()?);
    if byte_rate == 0 {
        return None;
    }
    Some(wav.len().saturating_sub(WAV_HEADER_LEN) as f64 / byte_rate as f64)
}

async fn run_convert(
    config: &Config,
    files: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let settings = config.batch_settings();

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました。現在のファイルの後で停止します...");
        cancel_clone.store(true, Ordering::SeqCst);
    })?;

    let mut pipeline = build_pipeline(config).await.with_cancel_flag(cancel);
    match pipeline.encoder_name(settings.format) {
        Some(name) => log::info!("{} のエンコーダー: {}", settings.format, name),
        None => log::warn!(
            "{} はこの環境で利用できない可能性があります。WAV または MP3 を選択してください",
            settings.format
        ),
    }

    let mut batch = Batch::new();
    for file in &files {
        match batch.add_path(file) {
            Ok(_) => {}
            Err(e) => log::error!("追加できません {:?}: {}", file, e),
        }
    }
    if batch.is_empty() {
        anyhow::bail!("変換できるファイルがありません");
    }

    log::info!(
        "{} 件を {} ({}Hz{}) に変換します",
        batch.len(),
        settings.format,
        settings.sample_rate.hz(),
        if settings.format.is_lossless() {
            String::new()
        } else {
            format!(", {}kbps", settings.bitrate_kbps)
        }
    );

    let summary = batch.run(&mut pipeline, &settings, &mut JsonLineObserver).await;

    let dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.output.output_dir));
    let written = export_results(batch.items(), &dir)?;
    log::info!("{} 件を保存しました: {:?}", written.len(), dir.join(OUTPUT_FOLDER));

    if summary.failed > 0 {
        log::warn!("{} 件の変換に失敗しました", summary.failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;

    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or(config.output.log_level.as_str()))
        .format_timestamp(None)
        .filter_module("symphonia_core", log::LevelFilter::Warn)
        .filter_module("symphonia_bundle_mp3", log::LevelFilter::Warn)
        .filter_module("symphonia_format_isomp4", log::LevelFilter::Warn)
        .filter_module("symphonia_format_mkv", log::LevelFilter::Warn)
        .init();

    log::debug!("変換設定: {:?}", config.converter);

    match cli.command {
        Command::Convert {
            files,
            format,
            bitrate,
            sample_rate,
            output_dir,
        } => {
            if let Some(format) = format {
                config.converter.format = format;
            }
            if let Some(bitrate) = bitrate {
                config.converter.bitrate_kbps = bitrate;
            }
            if let Some(rate) = sample_rate {
                config.converter.sample_rate = rate;
            }
            run_convert(&config, files, output_dir).await?;
        }
        Command::Transcribe { file, prompt } => {
            let audio = tokio::fs::read(&file)
                .await
                .with_context(|| format!("読み込みに失敗: {:?}", file))?;
            let client = GeminiClient::new(config.gemini_config())?;
            let prompt = prompt.unwrap_or_else(|| config.remote.prompt.clone());
            let text = client
                .transcribe(Bytes::from(audio), guess_mime(&file), Some(&prompt))
                .await?;
            println!("{}", text);
        }
        Command::Speak { text, voice, out } => {
            let client = GeminiClient::new(config.gemini_config())?;
            let voice = voice.unwrap_or_else(|| config.remote.voice.clone());
            let audio = client.synthesize(&text, Some(&voice)).await?;

            let out = if out.extension().is_none() {
                out.with_extension(audio.extension())
            } else {
                out
            };
            std::fs::write(&out, &audio.bytes)
                .with_context(|| format!("書き込みに失敗: {:?}", out))?;

            match wav_duration_secs(&audio.bytes) {
                Some(duration) if audio.mime_type == "audio/wav" => {
                    log::info!("保存: {:?} ({})", out, format_duration(duration))
                }
                _ => log::info!("保存: {:?} ({})", out, audio.mime_type),
            }
        }
        Command::Formats => {
            let pipeline = build_pipeline(&config).await;
            for format in TargetFormat::ALL {
                println!(
                    "{:<5} {:<11} {}",
                    format.extension(),
                    format.mime_type(),
                    match pipeline.encoder_name(format) {
                        Some(name) => format!("利用可能 ({})", name),
                        None => "利用不可".to_string(),
                    }
                );
            }
        }
        Command::GenerateConfig { path } => {
            Config::write_default(&path)?;
            println!("設定ファイルを生成しました: {:?}", path);
        }
    }

    Ok(())
}
