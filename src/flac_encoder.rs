use crate::error::{ConvertError, ConvertResult};
use crate::types::SampleBuffer;
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use flacenc::source::MemSource;

/// FLAC エンコーダー
///
/// SampleBuffer を16ビットに量子化してFLAC形式に可逆圧縮する。
/// 量子化はWAV出力と同じ規則で行うため、FLACをデコードすると
/// 同じ設定で書き出したWAVのサンプルと完全に一致する。
///
/// # Examples
///
/// ```no_run
/// # use audio_alchemy::flac_encoder::FlacEncoder;
/// # use audio_alchemy::types::SampleBuffer;
/// let encoder = FlacEncoder::new(4096);
/// let buffer = SampleBuffer::silent(44100, 2, 44100);
/// let flac_data = encoder.encode(&buffer).unwrap();
/// ```
pub struct FlacEncoder {
    block_size: usize,
}

impl FlacEncoder {
    /// 新しいFLACエンコーダーを作成
    ///
    /// # Arguments
    ///
    /// * `block_size` - 1ブロックあたりのフレーム数（16〜65535、範囲外は丸める）
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(16, 65535),
        }
    }

    /// SampleBuffer をFLAC形式にエンコード
    ///
    /// # Errors
    ///
    /// 設定の検証またはエンコードに失敗した場合に [`ConvertError::EncodeFailure`] を返す。
    pub fn encode(&self, buffer: &SampleBuffer) -> ConvertResult<Vec<u8>> {
        if buffer.frame_count() == 0 {
            return Ok(Vec::new());
        }

        // i16からi32に変換（flacencの要求）
        let samples_i32: Vec<i32> = buffer
            .to_interleaved_i16()
            .into_iter()
            .map(|s| s as i32)
            .collect();

        let source = MemSource::from_samples(
            &samples_i32,
            buffer.channel_count(),
            16,
            buffer.sample_rate() as usize,
        );

        let mut config = flacenc::config::Encoder::default();
        config.block_size = self.block_size;

        let verified_config = config
            .into_verified()
            .map_err(|e| ConvertError::EncodeFailure(format!("FLAC設定の検証に失敗: {:?}", e)))?;

        let flac_stream =
            flacenc::encode_with_fixed_block_size(&verified_config, source, self.block_size)
                .map_err(|e| ConvertError::EncodeFailure(format!("FLACエンコードに失敗: {:?}", e)))?;

        let mut sink = ByteSink::new();
        flac_stream.write(&mut sink).map_err(|e| {
            ConvertError::EncodeFailure(format!("FLACストリームの書き込みに失敗: {:?}", e))
        })?;

        Ok(sink.into_inner())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for FlacEncoder {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// FLACデータをデコードしてチャンネル毎のPCMサンプルに戻す（テスト用ヘルパー関数）
    fn decode_flac(flac_data: &[u8]) -> (u32, Vec<Vec<i16>>) {
        let mut reader = claxon::FlacReader::new(Cursor::new(flac_data)).unwrap();
        let info = reader.streaminfo();
        let channels = info.channels as usize;
        let mut out = vec![Vec::new(); channels];

        for (i, sample) in reader.samples().enumerate() {
            out[i % channels].push(sample.unwrap() as i16);
        }

        // ブロック境界のパディングを除去
        if let Some(total) = info.samples {
            for channel in out.iter_mut() {
                channel.truncate(total as usize);
            }
        }

        (info.sample_rate, out)
    }

    fn sweep(sample_rate: u32, frames: usize, base: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (t * (base + t * 200.0) * 2.0 * std::f32::consts::PI).sin() * 0.6
            })
            .collect()
    }

    #[test]
    fn test_block_size_bounds() {
        assert_eq!(FlacEncoder::new(1).block_size(), 16);
        assert_eq!(FlacEncoder::new(1 << 20).block_size(), 65535);
        assert_eq!(FlacEncoder::default().block_size(), 4096);
    }

    #[test]
    fn test_encode_empty() {
        let encoder = FlacEncoder::default();
        let result = encoder.encode(&SampleBuffer::silent(16000, 1, 0)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_encode_silence_compresses() {
        let encoder = FlacEncoder::default();
        let buffer = SampleBuffer::silent(16000, 1, 16000);
        let flac_data = encoder.encode(&buffer).unwrap();

        assert!(!flac_data.is_empty());
        assert!(flac_data.len() < 16000 * 2 / 10);
        assert_eq!(&flac_data[0..4], b"fLaC");
    }

    #[test]
    fn test_roundtrip_stereo_matches_quantized_samples() {
        let left = sweep(22050, 22050, 220.0);
        let right = sweep(22050, 22050, 330.0);
        let buffer = SampleBuffer::new(22050, vec![left, right]);

        let flac_data = FlacEncoder::default().encode(&buffer).unwrap();
        let (sample_rate, decoded) = decode_flac(&flac_data);

        assert_eq!(sample_rate, 22050);
        assert_eq!(decoded.len(), 2);

        let interleaved = buffer.to_interleaved_i16();
        for (frame, pair) in interleaved.chunks_exact(2).enumerate() {
            assert_eq!(decoded[0][frame], pair[0], "左チャンネル {} が一致しません", frame);
            assert_eq!(decoded[1][frame], pair[1], "右チャンネル {} が一致しません", frame);
        }
    }

    #[test]
    fn test_roundtrip_odd_length_mono() {
        let buffer = SampleBuffer::new(48000, vec![sweep(48000, 5003, 100.0)]);
        let flac_data = FlacEncoder::new(1152).encode(&buffer).unwrap();
        let (_, decoded) = decode_flac(&flac_data);
        assert_eq!(decoded[0].len(), 5003);
        assert_eq!(decoded[0], buffer.to_interleaved_i16());
    }
}
