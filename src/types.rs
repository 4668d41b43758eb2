use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// 浮動小数点サンプルを16ビット整数に変換
///
/// [-1, 1] にクランプした後、負の値は 32768、非負の値は 32767 を掛けて
/// ゼロ方向に切り捨てる。符号付き16ビットの範囲に合わせた非対称スケーリングで、
/// 参照出力とのビット互換性のため係数を統一してはならない。
///
/// # Examples
///
/// ```
/// # use audio_alchemy::types::f32_to_i16;
/// assert_eq!(f32_to_i16(1.0), 32767);
/// assert_eq!(f32_to_i16(-1.0), -32768);
/// assert_eq!(f32_to_i16(2.5), 32767);
/// ```
pub fn f32_to_i16(sample: f32) -> SampleI16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as SampleI16
    } else {
        (clamped * 32767.0) as SampleI16
    }
}

/// デコード済みのマルチチャンネル音声
///
/// チャンネル毎に同じ長さの f32 サンプル列を保持する。
/// 各ステージはバッファを書き換えず、新しいバッファかバイト列を生成する。
///
/// # Examples
///
/// ```
/// # use audio_alchemy::types::SampleBuffer;
/// let buffer = SampleBuffer::new(44100, vec![vec![0.0; 441], vec![0.0; 441]]);
/// assert_eq!(buffer.channel_count(), 2);
/// assert_eq!(buffer.frame_count(), 441);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// 新しいバッファを作成
    ///
    /// # Panics
    ///
    /// サンプリングレートが0、チャンネルが空、またはチャンネル長が揃っていない場合。
    /// いずれも上流の不変条件違反であり、回復可能なエラーとしては扱わない。
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        assert!(sample_rate > 0, "サンプリングレートは正の値が必要");
        assert!(!channels.is_empty(), "チャンネルが1つ以上必要");
        let frames = channels[0].len();
        assert!(
            channels.iter().all(|c| c.len() == frames),
            "全チャンネルの長さが一致していません"
        );
        Self {
            sample_rate,
            channels,
        }
    }

    /// 無音バッファを作成
    pub fn silent(sample_rate: u32, channel_count: usize, frames: usize) -> Self {
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    /// 指定チャンネルのサンプル列
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// 再生時間（秒）
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// フレーム順にインターリーブした16ビットサンプル列
    pub fn to_interleaved_i16(&self) -> Vec<SampleI16> {
        let mut out = Vec::with_capacity(self.frame_count() * self.channel_count());
        for frame in 0..self.frame_count() {
            for channel in &self.channels {
                out.push(f32_to_i16(channel[frame]));
            }
        }
        out
    }
}

/// 出力フォーマットのエンコード方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeStrategy {
    /// 非圧縮コンテナ（WAV）を直接書き出す
    Container,
    /// FLAC を直接エンコード
    Lossless,
    /// 外部エンコーダーバックエンドでブロック単位にエンコード
    LossyBackend,
    /// ライブキャプチャ経由でエンコード
    Capture,
}

/// 変換先フォーマット
///
/// 設定ファイルでは小文字の名前（`"wav"`, `"mp3"` など）で指定する。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Wav,
    Mp3,
    Flac,
    Webm,
    Ogg,
    Aac,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 6] = [
        TargetFormat::Wav,
        TargetFormat::Mp3,
        TargetFormat::Flac,
        TargetFormat::Webm,
        TargetFormat::Ogg,
        TargetFormat::Aac,
    ];

    /// MIMEタイプ
    pub fn mime_type(self) -> &'static str {
        match self {
            TargetFormat::Wav => "audio/wav",
            TargetFormat::Mp3 => "audio/mpeg",
            TargetFormat::Flac => "audio/flac",
            TargetFormat::Webm => "audio/webm",
            TargetFormat::Ogg => "audio/ogg",
            TargetFormat::Aac => "audio/aac",
        }
    }

    /// 出力ファイルの拡張子
    pub fn extension(self) -> &'static str {
        extension_for_mime(self.mime_type())
    }

    /// 可逆フォーマットかどうか（ビットレート設定は無視される）
    pub fn is_lossless(self) -> bool {
        matches!(self, TargetFormat::Wav | TargetFormat::Flac)
    }

    pub fn strategy(self) -> EncodeStrategy {
        match self {
            TargetFormat::Wav => EncodeStrategy::Container,
            TargetFormat::Flac => EncodeStrategy::Lossless,
            TargetFormat::Mp3 => EncodeStrategy::LossyBackend,
            TargetFormat::Webm | TargetFormat::Ogg | TargetFormat::Aac => EncodeStrategy::Capture,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.mime_type() == mime)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    /// `"mp3"` のような名前と `"audio/mpeg"` のようなMIMEタイプの両方を受け付ける
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(format) = Self::from_mime(&lower) {
            return Ok(format);
        }
        match lower.as_str() {
            "wav" => Ok(TargetFormat::Wav),
            "mp3" | "mpeg" => Ok(TargetFormat::Mp3),
            "flac" => Ok(TargetFormat::Flac),
            "webm" => Ok(TargetFormat::Webm),
            "ogg" => Ok(TargetFormat::Ogg),
            "aac" => Ok(TargetFormat::Aac),
            other => Err(format!("未対応のフォーマット: {}", other)),
        }
    }
}

/// MIMEタイプに対応する拡張子（不明な場合は `bin`）
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "audio/wav" => "wav",
        "audio/mpeg" => "mp3",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/aac" => "aac",
        "audio/flac" => "flac",
        _ => "bin",
    }
}

/// 変換先サンプリングレート
///
/// 16000, 22050, 44100, 48000 Hz のいずれか。
/// 設定ファイルでは整数で指定し、それ以外の値は読み込み時に拒否される。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u32", into = "u32")]
pub struct TargetSampleRate(u32);

impl TargetSampleRate {
    pub const ALLOWED: [u32; 4] = [16000, 22050, 44100, 48000];

    pub const HZ_16000: TargetSampleRate = TargetSampleRate(16000);
    pub const HZ_22050: TargetSampleRate = TargetSampleRate(22050);
    pub const HZ_44100: TargetSampleRate = TargetSampleRate(44100);
    pub const HZ_48000: TargetSampleRate = TargetSampleRate(48000);

    pub fn hz(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for TargetSampleRate {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "未対応のサンプリングレート: {} (指定可能: {:?})",
                value,
                Self::ALLOWED
            ))
        }
    }
}

impl From<TargetSampleRate> for u32 {
    fn from(rate: TargetSampleRate) -> Self {
        rate.0
    }
}

impl FromStr for TargetSampleRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("サンプリングレートが数値ではありません: {}", s))?;
        Self::try_from(value)
    }
}

/// 1ファイル分の変換リクエスト
///
/// 作成後は変更しない。
#[derive(Clone, Debug)]
pub struct ConversionRequest {
    /// 入力音声のバイト列
    pub source: Bytes,
    /// 入力のMIMEタイプ（不明なら None）
    pub mime_hint: Option<String>,
    /// 入力のファイル名（拡張子をデコードのヒントに使う）
    pub name_hint: Option<String>,
    pub format: TargetFormat,
    /// 非可逆フォーマットでのみ有効
    pub bitrate_kbps: u32,
    pub sample_rate: TargetSampleRate,
}

/// 変換結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionResult {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

/// `m:ss` 形式の再生時間表記
///
/// # Examples
///
/// ```
/// # use audio_alchemy::types::format_duration;
/// assert_eq!(format_duration(125.7), "2:05");
/// ```
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
