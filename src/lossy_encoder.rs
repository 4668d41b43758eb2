use crate::error::{ConvertError, ConvertResult};
use crate::types::{f32_to_i16, SampleBuffer, SampleI16};

/// 1ブロックあたりのフレーム数（MP3フレームの粒度）
pub const BLOCK_FRAMES: usize = 1152;

/// 進捗通知とスケジューラへの譲渡を行う間隔（ブロック数）
pub const PROGRESS_INTERVAL_BLOCKS: usize = 100;

/// 非可逆エンコーダーのバックエンド
///
/// 起動時に選択してパイプラインに注入する。
/// `initialize` はリクエスト毎に呼ばれ、前回のエンコード状態を破棄する。
pub trait EncoderBackend: Send {
    /// バックエンド名（ログ用）
    fn name(&self) -> &str;

    /// エンコーダーを初期化
    ///
    /// # Arguments
    ///
    /// * `channels` - 1（モノラル）または 2（ステレオ）
    /// * `sample_rate` - サンプリングレート (Hz)
    /// * `bitrate_kbps` - 目標ビットレート (kbps)
    fn initialize(&mut self, channels: u16, sample_rate: u32, bitrate_kbps: u32) -> ConvertResult<()>;

    /// 1ブロック分のサンプルをエンコード
    ///
    /// 出力がまだ無い場合は空の Vec を返してよい。
    fn encode_block(&mut self, left: &[SampleI16], right: Option<&[SampleI16]>) -> ConvertResult<Vec<u8>>;

    /// 内部にバッファされた残りのデータを出力
    fn flush(&mut self) -> ConvertResult<Vec<u8>>;
}

/// 非可逆エンコードのオーケストレーション
///
/// 左右（またはモノラル）チャンネルを16ビットに量子化し、
/// [`BLOCK_FRAMES`] 単位でバックエンドに流し込む。
/// [`PROGRESS_INTERVAL_BLOCKS`] ブロック毎に 60〜100 の範囲で進捗を通知し、
/// 長時間のエンコード中も他のタスクが動けるように実行を譲る。
pub struct LossyEncoderAdapter {
    backend: Option<Box<dyn EncoderBackend>>,
}

impl LossyEncoderAdapter {
    pub fn new(backend: Option<Box<dyn EncoderBackend>>) -> Self {
        Self { backend }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|b| b.name())
    }

    /// バッファをエンコード
    ///
    /// # Errors
    ///
    /// バックエンドが無い場合は [`ConvertError::EncoderUnavailable`]。
    /// このエラーは当該リクエストのみを失敗させる。
    pub async fn encode(
        &mut self,
        buffer: &SampleBuffer,
        bitrate_kbps: u32,
        on_progress: &mut dyn FnMut(u8),
    ) -> ConvertResult<Vec<u8>> {
        let backend = self.backend.as_deref_mut().ok_or_else(|| {
            ConvertError::EncoderUnavailable("非可逆エンコーダーのバックエンドが読み込まれていません".to_string())
        })?;

        let channels = buffer.channel_count().min(2);
        if buffer.channel_count() > 2 {
            log::warn!(
                "{}チャンネルの入力: 先頭2チャンネルのみエンコードします",
                buffer.channel_count()
            );
        }

        let left: Vec<SampleI16> = buffer.channel(0).iter().map(|&s| f32_to_i16(s)).collect();
        let right: Option<Vec<SampleI16>> = (channels > 1)
            .then(|| buffer.channel(1).iter().map(|&s| f32_to_i16(s)).collect());

        backend.initialize(channels as u16, buffer.sample_rate(), bitrate_kbps)?;
        log::debug!(
            "{}: {}ch, {}Hz, {}kbps でエンコード開始",
            backend.name(),
            channels,
            buffer.sample_rate(),
            bitrate_kbps
        );

        let total = left.len();
        let mut output = Vec::new();

        for (block, start) in (0..total).step_by(BLOCK_FRAMES).enumerate() {
            let end = (start + BLOCK_FRAMES).min(total);
            let chunk = backend.encode_block(
                &left[start..end],
                right.as_deref().map(|r| &r[start..end]),
            )?;
            output.extend_from_slice(&chunk);

            if block % PROGRESS_INTERVAL_BLOCKS == 0 {
                on_progress(progress_for(start, total));
                tokio::task::yield_now().await;
            }
        }

        output.extend_from_slice(&backend.flush()?);
        on_progress(100);

        Ok(output)
    }
}

/// 処理済みフレーム数を 60〜100 の進捗値に変換
fn progress_for(frames_done: usize, total: usize) -> u8 {
    if total == 0 {
        return 60;
    }
    (60 + frames_done * 40 / total) as u8
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// 呼び出しを記録するテスト用バックエンド
    #[derive(Default, Clone)]
    pub(crate) struct RecordingBackend {
        pub(crate) log: Arc<Mutex<RecordedCalls>>,
    }

    #[derive(Default, Debug)]
    pub(crate) struct RecordedCalls {
        pub(crate) init: Option<(u16, u32, u32)>,
        pub(crate) blocks: Vec<(usize, bool)>,
        pub(crate) first_left: Vec<SampleI16>,
        pub(crate) flushed: bool,
    }

    impl EncoderBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn initialize(&mut self, channels: u16, sample_rate: u32, bitrate_kbps: u32) -> ConvertResult<()> {
            let mut log = self.log.lock().unwrap();
            *log = RecordedCalls::default();
            log.init = Some((channels, sample_rate, bitrate_kbps));
            Ok(())
        }

        fn encode_block(&mut self, left: &[SampleI16], right: Option<&[SampleI16]>) -> ConvertResult<Vec<u8>> {
            let mut log = self.log.lock().unwrap();
            if log.blocks.is_empty() {
                log.first_left = left.to_vec();
            }
            log.blocks.push((left.len(), right.is_some()));
            Ok(vec![0xAB; 4])
        }

        fn flush(&mut self) -> ConvertResult<Vec<u8>> {
            self.log.lock().unwrap().flushed = true;
            Ok(vec![0xCD; 2])
        }
    }

    struct FailingBackend;

    impl EncoderBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn initialize(&mut self, _: u16, _: u32, _: u32) -> ConvertResult<()> {
            Ok(())
        }

        fn encode_block(&mut self, _: &[SampleI16], _: Option<&[SampleI16]>) -> ConvertResult<Vec<u8>> {
            Err(ConvertError::EncodeFailure("壊れたブロック".to_string()))
        }

        fn flush(&mut self) -> ConvertResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_missing_backend_is_unavailable() {
        let mut adapter = LossyEncoderAdapter::new(None);
        assert_eq!(adapter.backend_name(), None);
        let buffer = SampleBuffer::silent(44100, 2, 100);
        let result = adapter.encode(&buffer, 192, &mut |_| {}).await;
        assert!(matches!(result, Err(ConvertError::EncoderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_blocks_and_flush() {
        let backend = RecordingBackend::default();
        let log = backend.log.clone();
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(backend)));

        let buffer = SampleBuffer::silent(44100, 2, BLOCK_FRAMES * 3 + 10);
        let bytes = adapter.encode(&buffer, 128, &mut |_| {}).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.init, Some((2, 44100, 128)));
        assert_eq!(
            log.blocks,
            vec![
                (BLOCK_FRAMES, true),
                (BLOCK_FRAMES, true),
                (BLOCK_FRAMES, true),
                (10, true)
            ]
        );
        assert!(log.flushed);
        assert_eq!(bytes.len(), 4 * 4 + 2);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xCD, 0xCD]);
    }

    #[tokio::test]
    async fn test_mono_and_multichannel_inputs() {
        let backend = RecordingBackend::default();
        let log = backend.log.clone();
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(backend)));

        adapter
            .encode(&SampleBuffer::silent(22050, 1, 50), 96, &mut |_| {})
            .await
            .unwrap();
        assert_eq!(log.lock().unwrap().init, Some((1, 22050, 96)));
        assert_eq!(log.lock().unwrap().blocks, vec![(50, false)]);

        adapter
            .encode(&SampleBuffer::silent(48000, 6, 50), 320, &mut |_| {})
            .await
            .unwrap();
        assert_eq!(log.lock().unwrap().init, Some((2, 48000, 320)));
    }

    #[tokio::test]
    async fn test_samples_are_quantized_with_clamp() {
        let backend = RecordingBackend::default();
        let log = backend.log.clone();
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(backend)));

        let buffer = SampleBuffer::new(16000, vec![vec![1.0, -1.0, 2.0, -2.0, 0.0]]);
        adapter.encode(&buffer, 64, &mut |_| {}).await.unwrap();

        assert_eq!(
            log.lock().unwrap().first_left,
            vec![32767, -32768, 32767, -32768, 0]
        );
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(RecordingBackend::default())));
        let buffer = SampleBuffer::silent(44100, 2, BLOCK_FRAMES * 250);

        let mut seen = Vec::new();
        adapter
            .encode(&buffer, 192, &mut |p| seen.push(p))
            .await
            .unwrap();

        // ブロック 0, 100, 200 と最後の 100
        assert_eq!(seen, vec![60, 76, 92, 100]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(FailingBackend)));
        let result = adapter
            .encode(&SampleBuffer::silent(44100, 1, 10), 128, &mut |_| {})
            .await;
        assert!(matches!(result, Err(ConvertError::EncodeFailure(_))));
    }

    #[test]
    fn test_progress_mapping() {
        assert_eq!(progress_for(0, 1000), 60);
        assert_eq!(progress_for(500, 1000), 80);
        assert_eq!(progress_for(999, 1000), 99);
        assert_eq!(progress_for(0, 0), 60);
    }
}
