use crate::decoder::{self, DecodeHint, FallbackDecoder};
use crate::error::{ConvertError, ConvertResult};
use crate::resampler;
use crate::types::SampleBuffer;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 音声処理コンテキストのプール
///
/// 同時に存在できるコンテキスト数を制限する。
/// 変換は1件ずつ実行するため通常は上限1で十分で、
/// 解放漏れがあると次の変換で確保に失敗する。
#[derive(Clone, Debug)]
pub struct ContextPool {
    max_contexts: usize,
    active: Arc<AtomicUsize>,
}

impl ContextPool {
    pub fn new(max_contexts: usize) -> Self {
        Self {
            max_contexts: max_contexts.max(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// コンテキストを確保
    ///
    /// # Errors
    ///
    /// 上限に達している場合は [`ConvertError::ResourceAcquisitionFailure`] を返す。
    pub fn acquire(&self) -> ConvertResult<ProcessingContext> {
        let acquired = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_contexts).then_some(n + 1)
            });

        match acquired {
            Ok(previous) => {
                log::debug!("音声処理コンテキストを確保 (使用中: {})", previous + 1);
                Ok(ProcessingContext {
                    active: Some(self.active.clone()),
                })
            }
            Err(current) => Err(ConvertError::ResourceAcquisitionFailure(format!(
                "同時に使用できるコンテキスト数の上限 ({}) に達しています (使用中: {})",
                self.max_contexts, current
            ))),
        }
    }

    /// 使用中のコンテキスト数
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_contexts(&self) -> usize {
        self.max_contexts
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(1)
    }
}

/// 1回の変換が占有する音声処理コンテキスト
///
/// デコードとレンダリング（リサンプル）はこのハンドル経由で行う。
/// ドロップ時に必ず解放されるため、エラーで途中終了してもプールに返却される。
#[derive(Debug)]
pub struct ProcessingContext {
    active: Option<Arc<AtomicUsize>>,
}

impl ProcessingContext {
    /// 入力バイト列をデコード
    ///
    /// デコードはブロッキングスレッドで実行し、完了まで待機する。
    pub async fn decode(
        &self,
        data: Bytes,
        mime_type: Option<String>,
        file_name: Option<String>,
    ) -> ConvertResult<SampleBuffer> {
        self.ensure_open()?;
        tokio::task::spawn_blocking(move || {
            let hint = DecodeHint {
                mime_type: mime_type.as_deref(),
                file_name: file_name.as_deref(),
            };
            decoder::decode_audio(data, &hint)
        })
        .await?
    }

    /// 外部デコーダーでデコード
    pub async fn decode_with(
        &self,
        decoder: &dyn FallbackDecoder,
        data: Bytes,
    ) -> ConvertResult<SampleBuffer> {
        self.ensure_open()?;
        decoder.decode(data).await
    }

    /// 指定したサンプリングレートでバッファをレンダリング
    pub async fn render(&self, buffer: SampleBuffer, target_rate: u32) -> ConvertResult<SampleBuffer> {
        self.ensure_open()?;
        tokio::task::spawn_blocking(move || resampler::resample(&buffer, target_rate)).await?
    }

    pub fn is_closed(&self) -> bool {
        self.active.is_none()
    }

    /// コンテキストを解放
    ///
    /// 解放済みの場合は何もしない。
    pub fn close(&mut self) {
        match self.active.take() {
            Some(active) => {
                let remaining = active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                log::debug!("音声処理コンテキストを解放 (使用中: {})", remaining);
            }
            None => log::trace!("解放済みのコンテキストへの close を無視"),
        }
    }

    fn ensure_open(&self) -> ConvertResult<()> {
        if self.is_closed() {
            return Err(ConvertError::ResourceAcquisitionFailure(
                "コンテキストは既に解放されています".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for ProcessingContext {
    fn drop(&mut self) {
        self.close();
    }
}
