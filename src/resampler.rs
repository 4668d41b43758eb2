use crate::error::{ConvertError, ConvertResult};
use crate::types::SampleBuffer;
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// 1回の処理で rubato に渡す入力フレーム数
const CHUNK_FRAMES: usize = 1024;

/// リサンプル後のフレーム数
///
/// `ceil(frames × target_rate / source_rate)`。整数演算で求めるため丸め誤差は無い。
pub fn expected_frames(frames: usize, source_rate: u32, target_rate: u32) -> usize {
    let numerator = frames as u128 * target_rate as u128;
    numerator.div_ceil(source_rate as u128) as usize
}

/// サンプリングレート変換
///
/// 窓付きsinc補間 (rubato の `SincFixedIn`) でチャンネル数を保ったまま変換する。
/// 入力を固定長チャンクで流し込み、末尾は `process_partial` でフラッシュした上で、
/// フィルタ遅延分を先頭から削って `expected_frames` の長さに揃える。
/// 広帯域の入力ではsinc補間がオーバーシュートするため、出力は [-1.0, 1.0] に収める。
///
/// # Examples
///
/// ```
/// # use audio_alchemy::types::SampleBuffer;
/// # use audio_alchemy::resampler::resample;
/// let buffer = SampleBuffer::silent(44100, 2, 441);
/// let resampled = resample(&buffer, 16000).unwrap();
/// assert_eq!(resampled.frame_count(), 160);
/// assert_eq!(resampled.channel_count(), 2);
/// ```
pub fn resample(buffer: &SampleBuffer, target_rate: u32) -> ConvertResult<SampleBuffer> {
    let source_rate = buffer.sample_rate();
    let channel_count = buffer.channel_count();
    let frames = buffer.frame_count();

    if source_rate == target_rate {
        return Ok(buffer.clone());
    }

    let expected = expected_frames(frames, source_rate, target_rate);
    if frames == 0 {
        return Ok(SampleBuffer::silent(target_rate, channel_count, 0));
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        2.0,
        params,
        CHUNK_FRAMES,
        channel_count,
    )
    .map_err(|e| ConvertError::ResourceAcquisitionFailure(format!("リサンプラー作成失敗: {}", e)))?;

    let delay = resampler.output_delay();
    let wanted = expected + delay;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channel_count];

    let append = |output: &mut Vec<Vec<f32>>, chunk: Vec<Vec<f32>>| {
        for (out, part) in output.iter_mut().zip(chunk) {
            out.extend_from_slice(&part);
        }
    };

    let mut position = 0;
    while position + resampler.input_frames_next() <= frames {
        let needed = resampler.input_frames_next();
        let input: Vec<&[f32]> = buffer
            .channels()
            .iter()
            .map(|c| &c[position..position + needed])
            .collect();
        let chunk = resampler
            .process(&input, None)
            .map_err(|e| ConvertError::DecodeFailure(format!("リサンプル失敗: {}", e)))?;
        append(&mut output, chunk);
        position += needed;
    }

    if position < frames {
        let input: Vec<&[f32]> = buffer
            .channels()
            .iter()
            .map(|c| &c[position..])
            .collect();
        let chunk = resampler
            .process_partial(Some(input.as_slice()), None)
            .map_err(|e| ConvertError::DecodeFailure(format!("リサンプル失敗: {}", e)))?;
        append(&mut output, chunk);
    }

    // 遅延分を含めて必要な長さになるまで無音でフラッシュ
    while output[0].len() < wanted {
        let chunk = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| ConvertError::DecodeFailure(format!("リサンプル失敗: {}", e)))?;
        if chunk[0].is_empty() {
            break;
        }
        append(&mut output, chunk);
    }

    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
        for sample in channel.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    log::debug!(
        "リサンプル完了: {}Hz → {}Hz, {} → {}フレーム",
        source_rate,
        target_rate,
        frames,
        expected
    );

    Ok(SampleBuffer::new(target_rate, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetSampleRate;

    fn tone(sample_rate: u32, frames: usize, gain: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (t * 1000.0 * 2.0 * std::f32::consts::PI).sin() * gain
            })
            .collect()
    }

    #[test]
    fn test_expected_frames_formula() {
        assert_eq!(expected_frames(44100, 44100, 16000), 16000);
        assert_eq!(expected_frames(1, 48000, 16000), 1);
        assert_eq!(expected_frames(3, 44100, 48000), 4);
        assert_eq!(expected_frames(0, 22050, 48000), 0);
    }

    #[test]
    fn test_output_length_for_all_rate_pairs() {
        for &from in &TargetSampleRate::ALLOWED {
            for &to in &TargetSampleRate::ALLOWED {
                for frames in [1usize, 1000, 2500] {
                    let buffer = SampleBuffer::new(from, vec![tone(from, frames, 0.5); 2]);
                    let resampled = resample(&buffer, to).unwrap();
                    assert_eq!(resampled.sample_rate(), to);
                    assert_eq!(resampled.channel_count(), 2);
                    assert_eq!(
                        resampled.frame_count(),
                        expected_frames(frames, from, to),
                        "{} → {} ({}フレーム)",
                        from,
                        to,
                        frames
                    );
                }
            }
        }
    }

    #[test]
    fn test_silence_is_preserved() {
        for &to in &[16000u32, 22050, 48000] {
            let buffer = SampleBuffer::silent(44100, 3, 3001);
            let resampled = resample(&buffer, to).unwrap();
            assert_eq!(resampled.channel_count(), 3);
            assert!(resampled
                .channels()
                .iter()
                .all(|c| c.iter().all(|&s| s == 0.0)));
        }
    }

    #[test]
    fn test_no_runaway_gain() {
        // クリップ寸前の矩形波
        let square: Vec<f32> = (0..4000)
            .map(|i| if (i / 50) % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let buffer = SampleBuffer::new(22050, vec![square]);
        let resampled = resample(&buffer, 48000).unwrap();
        assert!(resampled.channel(0).iter().all(|s| s.abs() < 1.5));
    }

    /// 線形合同法による ±1.0 のフルスケールノイズ
    fn full_scale_noise(frames: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..frames)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                if state >> 31 == 0 {
                    1.0
                } else {
                    -1.0
                }
            })
            .collect()
    }

    #[test]
    fn test_full_scale_noise_stays_bounded() {
        for &from in &TargetSampleRate::ALLOWED {
            for &to in &TargetSampleRate::ALLOWED {
                let buffer = SampleBuffer::new(
                    from,
                    vec![full_scale_noise(20000, 1), full_scale_noise(20000, 7)],
                );
                let resampled = resample(&buffer, to).unwrap();
                for channel in resampled.channels() {
                    let peak = channel.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
                    assert!(peak <= 1.0, "{} → {}: ピーク {}", from, to, peak);
                }
            }
        }
    }

    #[test]
    fn test_same_rate_is_identity() {
        let buffer = SampleBuffer::new(44100, vec![tone(44100, 500, 0.3)]);
        let resampled = resample(&buffer, 44100).unwrap();
        assert_eq!(resampled, buffer);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = SampleBuffer::silent(48000, 2, 0);
        let resampled = resample(&buffer, 16000).unwrap();
        assert_eq!(resampled.frame_count(), 0);
        assert_eq!(resampled.sample_rate(), 16000);
    }

    #[test]
    fn test_tone_energy_survives() {
        let buffer = SampleBuffer::new(48000, vec![tone(48000, 4800, 0.5)]);
        let resampled = resample(&buffer, 16000).unwrap();
        let peak = resampled
            .channel(0)
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak > 0.3 && peak < 0.7);
    }
}
