use crate::error::{ConvertError, ConvertResult};
use crate::types::SampleBuffer;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// デコード時のフォーマットヒント
#[derive(Clone, Debug, Default)]
pub struct DecodeHint<'a> {
    /// MIMEタイプ（例: "audio/mpeg"）
    pub mime_type: Option<&'a str>,
    /// ファイル名（拡張子のみ使用）
    pub file_name: Option<&'a str>,
}

/// symphonia で扱えない入力（Opus など）を外部ツールでデコードする
#[async_trait]
pub trait FallbackDecoder: Send + Sync {
    fn name(&self) -> &str;

    async fn decode(&self, data: Bytes) -> ConvertResult<SampleBuffer>;
}

/// 音声バイト列をデコードして SampleBuffer を生成
///
/// コンテナとコーデックは symphonia のプローブで判定する。
/// ヒントが無くても判定できる形式が多いが、拡張子やMIMEタイプがあれば優先的に使う。
/// 壊れたパケットは読み飛ばすが、1フレームもデコードできなかった場合は
/// 空の出力を返さずに [`ConvertError::DecodeFailure`] とする。
pub fn decode_audio(data: Bytes, hint: &DecodeHint<'_>) -> ConvertResult<SampleBuffer> {
    if data.is_empty() {
        return Err(ConvertError::DecodeFailure("入力データが空です".to_string()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let mut probe_hint = Hint::new();
    if let Some(mime) = hint.mime_type.filter(|m| !m.is_empty()) {
        probe_hint.mime_type(mime);
    }
    if let Some(ext) = hint
        .file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
    {
        probe_hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &probe_hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ConvertError::DecodeFailure(format!("フォーマットを判定できません: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ConvertError::DecodeFailure("音声トラックがありません".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ConvertError::DecodeFailure(format!("コーデックに対応していません: {}", e)))?;

    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels: Vec<Vec<f32>> = match track.codec_params.channels {
        Some(layout) => vec![Vec::new(); layout.count()],
        None => Vec::new(),
    };

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => {
                return Err(ConvertError::DecodeFailure(format!(
                    "パケットの読み込みに失敗: {}",
                    e
                )))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("壊れたパケットを読み飛ばします: {}", e);
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => {
                return Err(ConvertError::DecodeFailure(format!(
                    "デコードに失敗: {}",
                    e
                )))
            }
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count();
        if channel_count == 0 {
            continue;
        }
        if channels.len() != channel_count {
            if channels.iter().any(|c| !c.is_empty()) {
                return Err(ConvertError::DecodeFailure(
                    "ストリーム途中でチャンネル数が変化しました".to_string(),
                ));
            }
            channels = vec![Vec::new(); channel_count];
        }
        sample_rate.get_or_insert(spec.rate);

        let mut interleaved = InterleavedBuffer::<f32>::new(decoded.capacity() as u64, spec);
        interleaved.copy_interleaved_ref(decoded);
        for frame in interleaved.samples().chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
    }

    let sample_rate = sample_rate
        .filter(|&rate| rate > 0)
        .ok_or_else(|| ConvertError::DecodeFailure("サンプリングレートが不明です".to_string()))?;

    if channels.is_empty() || channels[0].is_empty() {
        return Err(ConvertError::DecodeFailure(
            "音声フレームをデコードできませんでした".to_string(),
        ));
    }

    let buffer = SampleBuffer::new(sample_rate, channels);
    log::debug!(
        "デコード完了: {}Hz, {}ch, {}フレーム",
        buffer.sample_rate(),
        buffer.channel_count(),
        buffer.frame_count()
    );
    Ok(buffer)
}
