use crate::decoder::FallbackDecoder;
use crate::error::{ConvertError, ConvertResult};
use crate::types::SampleBuffer;
use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// 入力を標準入力から読み、最初の音声ストリームを32ビット浮動小数点WAVで標準出力に書く
const DECODE_ARGS: [&str; 18] = [
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "pipe:0",
    "-map",
    "0:a:0",
    "-vn",
    "-map_metadata",
    "-1",
    "-fflags",
    "+bitexact",
    "-c:a",
    "pcm_f32le",
    "-f",
    "wav",
    "-y",
    "pipe:1",
];

/// ffmpeg の子プロセスによるデコード
///
/// symphonia が対応していないコーデック（WebM / OGG の Opus など）の受け皿。
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    binary: String,
}

impl FfmpegDecoder {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl FallbackDecoder for FfmpegDecoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn decode(&self, data: Bytes) -> ConvertResult<SampleBuffer> {
        let mut child = Command::new(&self.binary)
            .args(DECODE_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConvertError::DecodeFailure(format!("ffmpeg の起動に失敗: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConvertError::DecodeFailure("標準入力を取得できません".to_string()))?;
        let writer = tokio::spawn(async move {
            // 途中で終了された場合の書き込みエラーは終了コードで判定する
            let _ = stdin.write_all(&data).await;
            let _ = stdin.shutdown().await;
        });

        let output = child.wait_with_output().await?;
        writer.await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim();
            return Err(ConvertError::DecodeFailure(format!(
                "ffmpeg でデコードできません ({}): {}",
                output.status, detail
            )));
        }

        let buffer = parse_float_wav(&output.stdout)?;
        log::debug!(
            "ffmpeg でデコード完了: {}Hz, {}ch, {}フレーム",
            buffer.sample_rate(),
            buffer.channel_count(),
            buffer.frame_count()
        );
        Ok(buffer)
    }
}

fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?))
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(offset..offset + 4)?.try_into().ok()?))
}

/// ffmpeg がパイプに書いた32ビット浮動小数点WAVを読む
///
/// 出力先がシークできないため RIFF / data のサイズは埋まっていない。
/// `data` チャンク以降は末尾までを全てサンプルとして扱う。
fn parse_float_wav(bytes: &[u8]) -> ConvertResult<SampleBuffer> {
    let invalid = |reason: &str| ConvertError::DecodeFailure(format!("ffmpeg の出力を読めません: {}", reason));

    if bytes.get(0..4) != Some(b"RIFF".as_slice()) || bytes.get(8..12) != Some(b"WAVE".as_slice()) {
        return Err(invalid("RIFF/WAVE ヘッダーがありません"));
    }

    let mut format: Option<(usize, u32)> = None;
    let mut offset = 12;
    while let (Some(id), Some(size)) = (bytes.get(offset..offset + 4), le_u32(bytes, offset + 4)) {
        let body = offset + 8;
        match id {
            b"fmt " => {
                let channels = le_u16(bytes, body + 2).ok_or_else(|| invalid("fmt チャンクが短すぎます"))?;
                let rate = le_u32(bytes, body + 4).ok_or_else(|| invalid("fmt チャンクが短すぎます"))?;
                let bits = le_u16(bytes, body + 14).ok_or_else(|| invalid("fmt チャンクが短すぎます"))?;
                if channels == 0 || rate == 0 || bits != 32 {
                    return Err(invalid(&format!(
                        "想定外の形式です ({}ch, {}Hz, {}ビット)",
                        channels, rate, bits
                    )));
                }
                format = Some((channels as usize, rate));
            }
            b"data" => {
                let (channels, rate) = format.ok_or_else(|| invalid("data より前に fmt がありません"))?;
                return samples_from_f32le(&bytes[body..], channels, rate);
            }
            _ => {}
        }
        // チャンクは2バイト境界に揃えられる
        let size = size as usize;
        offset = body.saturating_add(size).saturating_add(size & 1);
    }

    Err(invalid("data チャンクがありません"))
}

fn samples_from_f32le(data: &[u8], channels: usize, sample_rate: u32) -> ConvertResult<SampleBuffer> {
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(data.len() / (4 * channels)); channels];
    for frame in data.chunks_exact(4 * channels) {
        for (channel, sample) in planar.iter_mut().zip(frame.chunks_exact(4)) {
            channel.push(f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]));
        }
    }

    if planar[0].is_empty() {
        return Err(ConvertError::DecodeFailure(
            "音声フレームをデコードできませんでした".to_string(),
        ));
    }
    Ok(SampleBuffer::new(sample_rate, planar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StreamingCaptureEncoder;
    use crate::decoder::{decode_audio, DecodeHint};
    use crate::ffmpeg_capture::FfmpegCapture;
    use std::sync::Arc;

    /// パイプ出力と同じくサイズ未確定 (0xFFFFFFFF) のヘッダーを持つWAV
    fn piped_float_wav(channels: u16, sample_rate: u32, bits: u16, samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(b"WAVE");

        // 奇数長のチャンクはパディングされる
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(b"INFO!\0");

        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&18u32.to_le_bytes());
        out.extend_from_slice(&3u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 4 * channels as u32).to_le_bytes());
        out.extend_from_slice(&(4 * channels).to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        out.extend_from_slice(b"data");
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_piped_stereo_wav() {
        let samples = [0.5f32, -0.5, 0.25, -0.25, 1.0, -1.0];
        let buffer = parse_float_wav(&piped_float_wav(2, 48000, 32, &samples)).unwrap();

        assert_eq!(buffer.sample_rate(), 48000);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.channel(0), &[0.5, 0.25, 1.0]);
        assert_eq!(buffer.channel(1), &[-0.5, -0.25, -1.0]);
    }

    #[test]
    fn test_trailing_partial_frame_is_dropped() {
        let mut wav = piped_float_wav(2, 16000, 32, &[0.1, 0.2, 0.3, 0.4]);
        wav.extend_from_slice(&[0, 0, 0x80]);
        let buffer = parse_float_wav(&wav).unwrap();
        assert_eq!(buffer.frame_count(), 2);
    }

    #[test]
    fn test_parse_rejects_bad_output() {
        let no_frames = piped_float_wav(1, 16000, 32, &[]);
        assert!(matches!(parse_float_wav(&no_frames), Err(ConvertError::DecodeFailure(_))));

        let pcm16 = piped_float_wav(1, 16000, 16, &[0.0; 4]);
        assert!(matches!(parse_float_wav(&pcm16), Err(ConvertError::DecodeFailure(_))));

        assert!(matches!(
            parse_float_wav(b"RIFF\xff\xff\xff\xffWAVE"),
            Err(ConvertError::DecodeFailure(_))
        ));
        assert!(matches!(parse_float_wav(b"OggS"), Err(ConvertError::DecodeFailure(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_decode_failure() {
        let decoder = FfmpegDecoder::new("/nonexistent/ffmpeg-binary");
        let result = decoder.decode(Bytes::from_static(b"OggS")).await;
        assert!(matches!(result, Err(ConvertError::DecodeFailure(_))));
    }

    #[tokio::test]
    #[ignore] // ffmpeg が必要
    async fn test_opus_roundtrip_with_ffmpeg() {
        let capture = FfmpegCapture::probe("ffmpeg").await.expect("ffmpeg が見つかりません");
        let encoder = StreamingCaptureEncoder::new(Some(Arc::new(capture)), false);
        let ogg = encoder
            .encode(&SampleBuffer::silent(48000, 2, 48000), "audio/ogg", 96)
            .await
            .unwrap();

        // symphonia には Opus デコーダーが無い
        let hint = DecodeHint {
            mime_type: Some("audio/ogg"),
            file_name: Some("voice.ogg"),
        };
        assert!(decode_audio(Bytes::from(ogg.clone()), &hint).is_err());

        let decoded = FfmpegDecoder::new("ffmpeg").decode(Bytes::from(ogg)).await.unwrap();
        assert_eq!(decoded.channel_count(), 2);
        assert_eq!(decoded.sample_rate(), 48000);
        assert!(decoded.frame_count() > 40000);
    }
}
