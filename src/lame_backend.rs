use crate::error::{ConvertError, ConvertResult};
use crate::lossy_encoder::EncoderBackend;
use crate::types::SampleI16;
use mp3lame_encoder::{max_required_buffer_size, Bitrate, Builder, DualPcm, Encoder, FlushNoGap, MonoPcm, Quality};

/// フラッシュ時に確保する出力バッファサイズ（LAME推奨値）
const FLUSH_BUFFER_BYTES: usize = 7200;

/// LAME による MP3 エンコーダーバックエンド
#[derive(Default)]
pub struct LameBackend {
    encoder: Option<Encoder>,
    channels: u16,
}

impl LameBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 要求ビットレートを LAME が扱える固定ビットレートに丸める
fn bitrate_for(kbps: u32) -> Bitrate {
    match kbps {
        0..=64 => Bitrate::Kbps64,
        65..=80 => Bitrate::Kbps80,
        81..=96 => Bitrate::Kbps96,
        97..=112 => Bitrate::Kbps112,
        113..=128 => Bitrate::Kbps128,
        129..=160 => Bitrate::Kbps160,
        161..=192 => Bitrate::Kbps192,
        193..=224 => Bitrate::Kbps224,
        225..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

impl EncoderBackend for LameBackend {
    fn name(&self) -> &str {
        "lame"
    }

    fn initialize(&mut self, channels: u16, sample_rate: u32, bitrate_kbps: u32) -> ConvertResult<()> {
        self.encoder = None;

        let mut builder = Builder::new().ok_or_else(|| {
            ConvertError::EncoderUnavailable("LAMEエンコーダーを作成できません".to_string())
        })?;
        builder
            .set_num_channels(channels as u8)
            .map_err(|e| ConvertError::EncodeFailure(format!("チャンネル数の設定に失敗: {:?}", e)))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|e| ConvertError::EncodeFailure(format!("サンプリングレートの設定に失敗: {:?}", e)))?;
        builder
            .set_brate(bitrate_for(bitrate_kbps))
            .map_err(|e| ConvertError::EncodeFailure(format!("ビットレートの設定に失敗: {:?}", e)))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|e| ConvertError::EncodeFailure(format!("品質の設定に失敗: {:?}", e)))?;

        let encoder = builder
            .build()
            .map_err(|e| ConvertError::EncodeFailure(format!("LAMEエンコーダーの構築に失敗: {:?}", e)))?;

        self.encoder = Some(encoder);
        self.channels = channels;
        Ok(())
    }

    fn encode_block(&mut self, left: &[SampleI16], right: Option<&[SampleI16]>) -> ConvertResult<Vec<u8>> {
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            ConvertError::EncodeFailure("エンコーダーが初期化されていません".to_string())
        })?;

        // encode_to_vec は確保済みの容量にしか書き込まない
        let mut output: Vec<u8> = Vec::with_capacity(max_required_buffer_size(left.len()));
        match (self.channels, right) {
            (2, Some(right)) => encoder.encode_to_vec(DualPcm { left, right }, &mut output),
            _ => encoder.encode_to_vec(MonoPcm(left), &mut output),
        }
        .map_err(|e| ConvertError::EncodeFailure(format!("MP3エンコードに失敗: {:?}", e)))?;
        Ok(output)
    }

    fn flush(&mut self) -> ConvertResult<Vec<u8>> {
        let mut encoder = self.encoder.take().ok_or_else(|| {
            ConvertError::EncodeFailure("エンコーダーが初期化されていません".to_string())
        })?;

        let mut output: Vec<u8> = Vec::with_capacity(FLUSH_BUFFER_BYTES);
        encoder
            .flush_to_vec::<FlushNoGap>(&mut output)
            .map_err(|e| ConvertError::EncodeFailure(format!("MP3フラッシュに失敗: {:?}", e)))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lossy_encoder::LossyEncoderAdapter;
    use crate::types::SampleBuffer;

    #[test]
    fn test_bitrate_mapping() {
        assert!(matches!(bitrate_for(32), Bitrate::Kbps64));
        assert!(matches!(bitrate_for(128), Bitrate::Kbps128));
        assert!(matches!(bitrate_for(130), Bitrate::Kbps160));
        assert!(matches!(bitrate_for(192), Bitrate::Kbps192));
        assert!(matches!(bitrate_for(1000), Bitrate::Kbps320));
    }

    #[test]
    fn test_encode_before_initialize_fails() {
        let mut backend = LameBackend::new();
        let result = backend.encode_block(&[0; 1152], None);
        assert!(matches!(result, Err(ConvertError::EncodeFailure(_))));
    }

    #[tokio::test]
    async fn test_stereo_produces_mpeg_frames() {
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(LameBackend::new())));
        let left: Vec<f32> = (0..44100)
            .map(|i| (i as f32 / 44100.0 * 440.0 * std::f32::consts::TAU).sin() * 0.5)
            .collect();
        let buffer = SampleBuffer::new(44100, vec![left.clone(), left]);

        let mp3 = adapter.encode(&buffer, 128, &mut |_| {}).await.unwrap();

        // 128kbps × 1秒 ≒ 16000バイト
        assert!(mp3.len() > 8000 && mp3.len() < 32000, "{} bytes", mp3.len());
        let sync = mp3
            .windows(2)
            .any(|w| w[0] == 0xFF && (w[1] & 0xE0) == 0xE0);
        assert!(sync, "MPEGフレーム同期ワードが見つかりません");
    }

    #[tokio::test]
    async fn test_reinitialize_between_requests() {
        let mut adapter = LossyEncoderAdapter::new(Some(Box::new(LameBackend::new())));
        let mono = SampleBuffer::silent(16000, 1, 16000);
        let stereo = SampleBuffer::silent(48000, 2, 4800);

        assert!(!adapter.encode(&mono, 64, &mut |_| {}).await.unwrap().is_empty());
        assert!(!adapter.encode(&stereo, 320, &mut |_| {}).await.unwrap().is_empty());
    }
}
