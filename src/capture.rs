use crate::error::{ConvertError, ConvertResult};
use crate::types::SampleBuffer;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 再生時に1回で書き込むフレーム数
pub const CAPTURE_BLOCK_FRAMES: usize = 4096;

/// レコーダーが発行するイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// エンコード済みデータの断片
    Data(Vec<u8>),
    /// 録音終了（以降イベントは来ない）
    Stopped,
    /// バックエンドのエラー
    Error(String),
}

/// ライブ録音セッション
///
/// `start` で受け取った送信チャンネルに、データが出来次第 [`CaptureEvent::Data`] を送る。
/// `stop` の後、残りのデータを送り切ってから [`CaptureEvent::Stopped`] を送る。
#[async_trait]
pub trait CaptureRecorder: Send {
    async fn start(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> ConvertResult<()>;

    /// インターリーブされた16ビットPCMを流し込む
    async fn write(&mut self, samples: &[i16]) -> ConvertResult<()>;

    async fn stop(&mut self) -> ConvertResult<()>;
}

/// ライブ録音によるエンコードを提供するバックエンド
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    /// 指定したMIMEタイプで録音できるか
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn open(
        &self,
        mime_type: &str,
        channels: u16,
        sample_rate: u32,
        bitrate_kbps: u32,
    ) -> ConvertResult<Box<dyn CaptureRecorder>>;
}

/// バッファを録音経由でエンコードする
///
/// 直接バイト列に変換するエンコーダーが無い形式向け。
/// バッファをブロック単位でレコーダーに再生し（`realtime` なら実時間で）、
/// 再生終了で停止して、`Stopped` を受け取った時点で全データを連結して返す。
pub struct StreamingCaptureEncoder {
    backend: Option<Arc<dyn CaptureBackend>>,
    realtime: bool,
}

impl StreamingCaptureEncoder {
    pub fn new(backend: Option<Arc<dyn CaptureBackend>>, realtime: bool) -> Self {
        Self { backend, realtime }
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|b| b.name())
    }

    pub fn is_type_supported(&self, mime_type: &str) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|b| b.is_type_supported(mime_type))
    }

    /// バッファを指定形式で録音する
    ///
    /// # Errors
    ///
    /// - 形式に対応していない場合は [`ConvertError::UnsupportedFormat`]
    /// - バックエンドがエラーイベントを送った場合や、停止通知前に終了した場合は
    ///   [`ConvertError::CaptureFailure`]
    pub async fn encode(
        &self,
        buffer: &SampleBuffer,
        mime_type: &str,
        bitrate_kbps: u32,
    ) -> ConvertResult<Vec<u8>> {
        let backend = match &self.backend {
            Some(backend) if backend.is_type_supported(mime_type) => backend,
            _ => return Err(ConvertError::UnsupportedFormat(mime_type.to_string())),
        };

        let mut recorder = backend.open(
            mime_type,
            buffer.channel_count() as u16,
            buffer.sample_rate(),
            bitrate_kbps,
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect_events(rx));
        recorder.start(tx).await?;

        log::debug!(
            "{} で録音開始: {} ({:.1}秒)",
            backend.name(),
            mime_type,
            buffer.duration_secs()
        );

        if let Err(e) = self.play(recorder.as_mut(), buffer, &collector).await {
            collector.abort();
            return Err(e);
        }

        recorder.stop().await?;
        let bytes = collector.await??;
        log::debug!("録音完了: {} バイト", bytes.len());
        Ok(bytes)
    }

    async fn play(
        &self,
        recorder: &mut dyn CaptureRecorder,
        buffer: &SampleBuffer,
        collector: &tokio::task::JoinHandle<ConvertResult<Vec<u8>>>,
    ) -> ConvertResult<()> {
        let interleaved = buffer.to_interleaved_i16();
        let channels = buffer.channel_count();
        let started = Instant::now();
        let mut frames_written = 0usize;

        for block in interleaved.chunks(CAPTURE_BLOCK_FRAMES * channels) {
            // エラーイベントで集約が先に終わった場合は再生を打ち切る
            if collector.is_finished() {
                break;
            }

            recorder.write(block).await?;
            frames_written += block.len() / channels;

            if self.realtime {
                let elapsed =
                    Duration::from_secs_f64(frames_written as f64 / buffer.sample_rate() as f64);
                tokio::time::sleep_until(started + elapsed).await;
            }
        }
        Ok(())
    }
}

/// イベントを停止通知まで集めて1つの結果にまとめる
async fn collect_events(mut rx: mpsc::UnboundedReceiver<CaptureEvent>) -> ConvertResult<Vec<u8>> {
    let mut chunks = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            CaptureEvent::Data(chunk) => chunks.extend_from_slice(&chunk),
            CaptureEvent::Stopped => return Ok(chunks),
            CaptureEvent::Error(message) => return Err(ConvertError::CaptureFailure(message)),
        }
    }
    Err(ConvertError::CaptureFailure(
        "停止通知を受け取る前にレコーダーが終了しました".to_string(),
    ))
}
