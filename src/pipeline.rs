use crate::capture::StreamingCaptureEncoder;
use crate::context::ContextPool;
use crate::decoder::FallbackDecoder;
use crate::error::{ConvertError, ConvertResult};
use crate::flac_encoder::FlacEncoder;
use crate::lossy_encoder::LossyEncoderAdapter;
use crate::types::{ConversionRequest, ConversionResult, EncodeStrategy, TargetFormat};
use crate::wav_writer::WavWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 進捗のチェックポイント
pub const PROGRESS_LOADED: u8 = 10;
pub const PROGRESS_DECODED: u8 = 30;
pub const PROGRESS_RESAMPLED: u8 = 60;
pub const PROGRESS_DONE: u8 = 100;

/// 1ファイル分の変換パイプライン
///
/// ```text
/// コンテキスト確保 → 10
///   → デコード (失敗時は外部デコーダー) → 30
///   → リサンプル → 60
///   → WAV / FLAC / MP3 (60→100) / 録音形式
///   → 100
/// ```
///
/// 音声処理コンテキストはリクエスト毎に確保し、成功・失敗に関わらず解放する。
pub struct ConversionPipeline {
    contexts: ContextPool,
    lossy: LossyEncoderAdapter,
    capture: StreamingCaptureEncoder,
    flac: FlacEncoder,
    fallback: Option<Arc<dyn FallbackDecoder>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ConversionPipeline {
    pub fn new(
        contexts: ContextPool,
        lossy: LossyEncoderAdapter,
        capture: StreamingCaptureEncoder,
        flac: FlacEncoder,
    ) -> Self {
        Self {
            contexts,
            lossy,
            capture,
            flac,
            fallback: None,
            cancel: None,
        }
    }

    /// symphonia でデコードできない入力に使うデコーダーを設定
    pub fn with_fallback_decoder(mut self, decoder: Arc<dyn FallbackDecoder>) -> Self {
        self.fallback = Some(decoder);
        self
    }

    /// 段階の合間に確認するキャンセルフラグを設定
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn contexts(&self) -> &ContextPool {
        &self.contexts
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// 指定フォーマットを担当するエンコーダーの名前（利用できなければ `None`）
    pub fn encoder_name(&self, format: TargetFormat) -> Option<&str> {
        match format.strategy() {
            EncodeStrategy::Container => Some("wav"),
            EncodeStrategy::Lossless => Some("flacenc"),
            EncodeStrategy::LossyBackend => self.lossy.backend_name(),
            EncodeStrategy::Capture => self
                .capture
                .is_type_supported(format.mime_type())
                .then(|| self.capture.backend_name())
                .flatten(),
        }
    }

    /// このホストで指定フォーマットへ変換できるか
    pub fn is_format_available(&self, format: TargetFormat) -> bool {
        match format.strategy() {
            EncodeStrategy::Container | EncodeStrategy::Lossless => true,
            EncodeStrategy::LossyBackend => self.lossy.is_available(),
            EncodeStrategy::Capture => self.capture.is_type_supported(format.mime_type()),
        }
    }

    /// リクエストを変換する
    ///
    /// `on_progress` には単調増加する 0〜100 の値が渡され、成功時の最後の値は 100。
    pub async fn convert(
        &mut self,
        request: &ConversionRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> ConvertResult<ConversionResult> {
        self.check_cancelled()?;
        let context = self.contexts.acquire()?;
        on_progress(PROGRESS_LOADED);

        let decoded = match context
            .decode(
                request.source.clone(),
                request.mime_hint.clone(),
                request.name_hint.clone(),
            )
            .await
        {
            Err(ConvertError::DecodeFailure(reason)) => match &self.fallback {
                Some(fallback) => {
                    log::debug!("{} でデコードを再試行 ({})", fallback.name(), reason);
                    context.decode_with(fallback.as_ref(), request.source.clone()).await?
                }
                None => return Err(ConvertError::DecodeFailure(reason)),
            },
            decoded => decoded?,
        };
        on_progress(PROGRESS_DECODED);
        self.check_cancelled()?;

        let rendered = context.render(decoded, request.sample_rate.hz()).await?;
        on_progress(PROGRESS_RESAMPLED);
        self.check_cancelled()?;

        let format = request.format;
        let bytes = match format.strategy() {
            EncodeStrategy::Container => {
                let wav = WavWriter::write(&rendered)?;
                on_progress(PROGRESS_DONE);
                wav
            }
            EncodeStrategy::Lossless => {
                let encoder = FlacEncoder::new(self.flac.block_size());
                let flac = tokio::task::spawn_blocking(move || encoder.encode(&rendered)).await??;
                on_progress(PROGRESS_DONE);
                flac
            }
            // 60→100 の進捗はアダプターが通知する
            EncodeStrategy::LossyBackend => {
                self.lossy
                    .encode(&rendered, request.bitrate_kbps, on_progress)
                    .await?
            }
            EncodeStrategy::Capture => {
                let captured = self
                    .capture
                    .encode(&rendered, format.mime_type(), request.bitrate_kbps)
                    .await?;
                on_progress(PROGRESS_DONE);
                captured
            }
        };

        drop(context);
        log::debug!("{} へ変換完了: {} バイト", format, bytes.len());

        Ok(ConversionResult {
            bytes,
            mime_type: format.mime_type(),
        })
    }

    fn check_cancelled(&self) -> ConvertResult<()> {
        if self.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }
        Ok(())
    }
}
