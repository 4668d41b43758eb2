use crate::capture::{CaptureBackend, CaptureEvent, CaptureRecorder};
use crate::error::{ConvertError, ConvertResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 標準出力から1回に読む最大バイト数
const READ_CHUNK_BYTES: usize = 16 * 1024;

/// MIMEタイプ毎の ffmpeg 出力設定（コンテナ, エンコーダー）
fn output_for(mime_type: &str) -> Option<(&'static str, &'static str)> {
    match mime_type {
        "audio/webm" => Some(("webm", "libopus")),
        "audio/ogg" => Some(("ogg", "libopus")),
        "audio/aac" => Some(("adts", "aac")),
        _ => None,
    }
}

/// `ffmpeg -encoders` の出力から音声エンコーダー名を抜き出す
///
/// 対象行の形式: ` A....D libopus              libopus Opus`
fn parse_audio_encoders(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let flags = tokens.next()?;
            let name = tokens.next()?;
            (flags.len() == 6 && flags.starts_with('A') && name != "=")
                .then(|| name.to_string())
        })
        .collect()
}

/// ffmpeg の子プロセスでライブ録音を行うバックエンド
///
/// PCM (s16le) を標準入力に流し込み、標準出力に出たコンテナデータを
/// そのままデータイベントとして送る。
#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    binary: String,
    encoders: HashSet<String>,
}

impl FfmpegCapture {
    /// ffmpeg を起動して利用可能なエンコーダーを調べる
    ///
    /// 実行できない場合は `None`（録音系の形式は全て非対応になる）。
    pub async fn probe(binary: &str) -> Option<Self> {
        let output = Command::new(binary)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let encoders = parse_audio_encoders(&String::from_utf8_lossy(&output.stdout));
                log::info!(
                    "ffmpeg を検出: {} (音声エンコーダー {} 個)",
                    binary,
                    encoders.len()
                );
                Some(Self::with_encoders(binary, encoders))
            }
            Ok(output) => {
                log::warn!("ffmpeg のエンコーダー一覧取得に失敗: {}", output.status);
                None
            }
            Err(e) => {
                log::warn!("ffmpeg を起動できません ({}): {}", binary, e);
                None
            }
        }
    }

    pub fn with_encoders(binary: &str, encoders: HashSet<String>) -> Self {
        Self {
            binary: binary.to_string(),
            encoders,
        }
    }

    fn args(mime_type: &str, channels: u16, sample_rate: u32, bitrate_kbps: u32) -> Option<Vec<String>> {
        let (container, codec) = output_for(mime_type)?;
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "s16le",
            "-ar",
            sample_rate.to_string().as_str(),
            "-ac",
            channels.to_string().as_str(),
            "-i",
            "pipe:0",
            "-c:a",
            codec,
            "-b:a",
            format!("{}k", bitrate_kbps).as_str(),
            "-f",
            container,
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Some(args)
    }
}

impl CaptureBackend for FfmpegCapture {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        output_for(mime_type).is_some_and(|(_, codec)| self.encoders.contains(codec))
    }

    fn open(
        &self,
        mime_type: &str,
        channels: u16,
        sample_rate: u32,
        bitrate_kbps: u32,
    ) -> ConvertResult<Box<dyn CaptureRecorder>> {
        let args = Self::args(mime_type, channels, sample_rate, bitrate_kbps)
            .ok_or_else(|| ConvertError::UnsupportedFormat(mime_type.to_string()))?;
        Ok(Box::new(FfmpegRecorder {
            binary: self.binary.clone(),
            args,
            child: None,
            stdin: None,
            reader: None,
            stderr: None,
            events: None,
        }))
    }
}

struct FfmpegRecorder {
    binary: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
}

#[async_trait]
impl CaptureRecorder for FfmpegRecorder {
    async fn start(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> ConvertResult<()> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConvertError::CaptureFailure(format!("ffmpeg の起動に失敗: {}", e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConvertError::CaptureFailure("標準出力を取得できません".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConvertError::CaptureFailure("標準エラーを取得できません".to_string()))?;

        let tx = events.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                let mut chunk = vec![0u8; READ_CHUNK_BYTES];
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        chunk.truncate(n);
                        if tx.send(CaptureEvent::Data(chunk)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(CaptureEvent::Error(format!("標準出力の読み込みに失敗: {}", e)));
                        break;
                    }
                }
            }
        }));

        self.stderr = Some(tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        }));

        self.stdin = child.stdin.take();
        self.child = Some(child);
        self.events = Some(events);
        Ok(())
    }

    async fn write(&mut self, samples: &[i16]) -> ConvertResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ConvertError::CaptureFailure("録音が開始されていません".to_string()))?;

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| ConvertError::CaptureFailure(format!("ffmpeg への書き込みに失敗: {}", e)))
    }

    async fn stop(&mut self) -> ConvertResult<()> {
        // 標準入力を閉じると ffmpeg は残りを書き出して終了する
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(reader) = self.reader.take() {
            reader.await?;
        }

        let mut child = self
            .child
            .take()
            .ok_or_else(|| ConvertError::CaptureFailure("録音が開始されていません".to_string()))?;
        let status = child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await?,
            None => String::new(),
        };

        let Some(events) = self.events.take() else {
            return Ok(());
        };
        if status.success() {
            let _ = events.send(CaptureEvent::Stopped);
        } else {
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            let _ = events.send(CaptureEvent::Error(format!(
                "ffmpeg が異常終了しました ({}): {}",
                status, detail
            )));
        }
        Ok(())
    }
}
