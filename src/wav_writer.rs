use crate::error::{ConvertError, ConvertResult};
use crate::types::{SampleBuffer, SampleI16};
use bytes::{BufMut, BytesMut};

/// WAVヘッダーのバイト数
pub const WAV_HEADER_LEN: usize = 44;

/// 32ビットのRIFFサイズで表せる最大のデータ長
pub const MAX_DATA_LEN: u32 = u32::MAX - (WAV_HEADER_LEN as u32 - 8);

/// サンプル数から `data` チャンクのバイト数を求める
///
/// RIFF ヘッダーに収まらない場合は [`ConvertError::EncodeFailure`]。
pub fn data_chunk_len(sample_count: usize) -> ConvertResult<u32> {
    sample_count
        .checked_mul(2)
        .and_then(|len| u32::try_from(len).ok())
        .filter(|&len| len <= MAX_DATA_LEN)
        .ok_or_else(|| {
            ConvertError::EncodeFailure(format!(
                "WAVの上限 ({} バイト) を超えています: {} サンプル",
                MAX_DATA_LEN, sample_count
            ))
        })
}

/// 非圧縮WAVコンテナの書き出し
///
/// 44バイト固定のヘッダーと、フレーム毎にインターリーブした
/// 16ビット符号付きリトルエンディアンのサンプルを出力する。
/// チャンネル数に関わらず `fmt ` チャンクは常に16バイトのPCM形式で、
/// WAVE_FORMAT_EXTENSIBLE は使わない。
///
/// # Examples
///
/// ```
/// # use audio_alchemy::types::SampleBuffer;
/// # use audio_alchemy::wav_writer::WavWriter;
/// let buffer = SampleBuffer::silent(16000, 1, 160);
/// let bytes = WavWriter::write(&buffer).unwrap();
/// assert_eq!(bytes.len(), 44 + 160 * 2);
/// assert_eq!(&bytes[0..4], b"RIFF");
/// ```
pub struct WavWriter;

impl WavWriter {
    /// SampleBuffer をWAVバイト列に変換
    pub fn write(buffer: &SampleBuffer) -> ConvertResult<Vec<u8>> {
        let samples = buffer.to_interleaved_i16();
        Self::write_pcm16(&samples, buffer.channel_count() as u16, buffer.sample_rate())
    }

    /// 量子化済みのインターリーブサンプルをWAVバイト列に変換
    ///
    /// # Arguments
    ///
    /// * `samples` - フレーム順にインターリーブされたサンプル
    /// * `channels` - チャンネル数
    /// * `sample_rate` - サンプリングレート (Hz)
    ///
    /// # Errors
    ///
    /// データが 4GiB 弱の上限を超える場合は [`ConvertError::EncodeFailure`]。
    pub fn write_pcm16(samples: &[SampleI16], channels: u16, sample_rate: u32) -> ConvertResult<Vec<u8>> {
        let data_len = data_chunk_len(samples.len())?;
        let mut out = BytesMut::with_capacity(WAV_HEADER_LEN + data_len as usize);

        out.put_slice(b"RIFF");
        out.put_u32_le(data_len + (WAV_HEADER_LEN as u32 - 8));
        out.put_slice(b"WAVE");

        out.put_slice(b"fmt ");
        out.put_u32_le(16);
        out.put_u16_le(1); // リニアPCM
        out.put_u16_le(channels);
        out.put_u32_le(sample_rate);
        out.put_u32_le(sample_rate * 2 * channels as u32); // バイトレート
        out.put_u16_le(channels * 2); // ブロックアライン
        out.put_u16_le(16);

        out.put_slice(b"data");
        out.put_u32_le(data_len);

        for &sample in samples {
            out.put_i16_le(sample);
        }

        Ok(out.to_vec())
    }
}
