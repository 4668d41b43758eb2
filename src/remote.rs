use crate::error::ConvertResult;
use crate::types::extension_for_mime;
use async_trait::async_trait;
use bytes::Bytes;

/// 文字起こしの既定プロンプト
pub const DEFAULT_TRANSCRIBE_PROMPT: &str = "Transcrivez cet audio fidèlement.";

/// 応答にテキストが含まれなかった場合の文字起こし結果
pub const EMPTY_TRANSCRIPT: &str = "Aucune transcription générée.";

/// 音声合成の既定ボイス
pub const DEFAULT_VOICE: &str = "Kore";

/// 入力のMIMEタイプが不明な場合に送る値
pub const FALLBACK_AUDIO_MIME: &str = "audio/mp3";

/// 合成された音声
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl SynthesizedAudio {
    /// 保存時の拡張子
    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

/// 音声 → テキスト
///
/// 失敗はすべて [`crate::error::ConvertError::RemoteServiceFailure`]。
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: Bytes,
        mime_hint: Option<&str>,
        prompt: Option<&str>,
    ) -> ConvertResult<String>;
}

/// テキスト → 音声
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> ConvertResult<SynthesizedAudio>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesized_extension() {
        let audio = SynthesizedAudio {
            bytes: vec![],
            mime_type: "audio/wav".to_string(),
        };
        assert_eq!(audio.extension(), "wav");

        let unknown = SynthesizedAudio {
            bytes: vec![],
            mime_type: "application/x-unknown".to_string(),
        };
        assert_eq!(unknown.extension(), "bin");
    }
}
