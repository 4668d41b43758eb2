use crate::batch::BatchSettings;
use crate::gemini::GeminiConfig;
use crate::remote::{DEFAULT_TRANSCRIBE_PROMPT, DEFAULT_VOICE};
use crate::types::{TargetFormat, TargetSampleRate};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// APIキーを読む環境変数（先にあるものを優先）
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub flac: FlacConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// 変換設定
///
/// # デフォルト値
///
/// - `format`: "wav"
/// - `bitrate_kbps`: 192（WAV / FLAC では無視）
/// - `sample_rate`: 44100 Hz（16000, 22050, 44100, 48000 のみ指定可）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConverterConfig {
    #[serde(default = "default_format")]
    pub format: TargetFormat,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: TargetSampleRate,
}

/// バッチ実行設定
///
/// - `retry_errored`: true（前回エラーになったアイテムも再実行する）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default = "default_retry_errored")]
    pub retry_errored: bool,
}

/// 音声処理リソース設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourcesConfig {
    /// 同時に確保できる音声処理コンテキスト数
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,
}

/// 録音系フォーマット（WebM / OGG / AAC）の設定
///
/// # デフォルト値
///
/// - `enabled`: true
/// - `ffmpeg_path`: "ffmpeg"
/// - `realtime`: true（実時間で再生しながら録音する）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

/// FLAC出力設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlacConfig {
    #[serde(default = "default_flac_block_size")]
    pub block_size: usize,
}

/// 出力設定
///
/// # デフォルト値
///
/// - `output_dir`: "."（この下に `Convertion/` を作る）
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// 外部サービス（Gemini）設定
///
/// `api_key` を省略した場合は環境変数 `GEMINI_API_KEY`、`API_KEY` の順に参照する。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_transcribe_model")]
    pub transcribe_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

// Default functions
fn default_format() -> TargetFormat {
    TargetFormat::Wav
}

fn default_bitrate_kbps() -> u32 {
    192
}

fn default_sample_rate() -> TargetSampleRate {
    TargetSampleRate::HZ_44100
}

fn default_retry_errored() -> bool {
    true
}

fn default_max_contexts() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_realtime() -> bool {
    true
}

fn default_flac_block_size() -> usize {
    4096
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_transcribe_model() -> String {
    "gemini-flash-latest".to_string()
}

fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_prompt() -> String {
    DEFAULT_TRANSCRIBE_PROMPT.to_string()
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            bitrate_kbps: default_bitrate_kbps(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retry_errored: default_retry_errored(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            max_contexts: default_max_contexts(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ffmpeg_path: default_ffmpeg_path(),
            realtime: default_realtime(),
        }
    }
}

impl Default for FlacConfig {
    fn default() -> Self {
        Self {
            block_size: default_flac_block_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            transcribe_model: default_transcribe_model(),
            tts_model: default_tts_model(),
            timeout_secs: default_timeout_secs(),
            voice: default_voice(),
            prompt: default_prompt(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    /// 対応していないサンプリングレートやフォーマット名もパースエラーになる。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use audio_alchemy::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            format: self.converter.format,
            bitrate_kbps: self.converter.bitrate_kbps,
            sample_rate: self.converter.sample_rate,
            retry_errored: self.batch.retry_errored,
        }
    }

    /// Gemini クライアント設定（APIキーは設定ファイル → 環境変数の順）
    pub fn gemini_config(&self) -> GeminiConfig {
        let api_key = self.remote.api_key.clone().filter(|k| !k.is_empty()).or_else(|| {
            API_KEY_ENV_VARS
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|k| !k.is_empty()))
        });

        GeminiConfig {
            api_key,
            base_url: self.remote.base_url.clone(),
            transcribe_model: self.remote.transcribe_model.clone(),
            tts_model: self.remote.tts_model.clone(),
            timeout_secs: self.remote.timeout_secs,
        }
    }
}
