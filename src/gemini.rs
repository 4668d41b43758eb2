use crate::error::{ConvertError, ConvertResult};
use crate::remote::{
    SpeechSynthesizer, SynthesizedAudio, Transcriber, DEFAULT_TRANSCRIBE_PROMPT, DEFAULT_VOICE,
    EMPTY_TRANSCRIPT, FALLBACK_AUDIO_MIME,
};
use crate::wav_writer::WavWriter;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// L16 応答にレート指定が無い場合のサンプリングレート
pub const DEFAULT_PCM_RATE: u32 = 24000;

/// Gemini API設定
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub transcribe_model: String,
    pub tts_model: String,
    pub timeout_secs: u64,
}

// --- リクエスト / レスポンス ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates.iter().take(1).flat_map(|c| c.content.parts.iter())
    }

    /// 先頭候補のテキストを連結（無ければ空文字列）
    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }

    fn inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }
}

/// Gemini REST API クライアント
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> ConvertResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConvertError::RemoteServiceFailure(format!("HTTPクライアント作成失敗: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_key(&self) -> ConvertResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConvertError::RemoteServiceFailure("APIキーが設定されていません".to_string()))
    }

    async fn generate(&self, model: &str, request: &GenerateContentRequest) -> ConvertResult<GenerateContentResponse> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ConvertError::RemoteServiceFailure(format!("リクエスト失敗: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ConvertError::RemoteServiceFailure(format!(
                "Gemini API エラー: {} - {}",
                status, error_text
            )));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ConvertError::RemoteServiceFailure(format!("レスポンスパース失敗: {}", e)))
    }
}

#[async_trait]
impl Transcriber for GeminiClient {
    async fn transcribe(
        &self,
        audio: Bytes,
        mime_hint: Option<&str>,
        prompt: Option<&str>,
    ) -> ConvertResult<String> {
        let request = transcribe_request(&audio, mime_hint, prompt);
        log::debug!(
            "Gemini: {} バイトの音声を文字起こし中 ({})",
            audio.len(),
            self.config.transcribe_model
        );

        let response = self.generate(&self.config.transcribe_model, &request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Ok(EMPTY_TRANSCRIPT.to_string());
        }
        Ok(text)
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> ConvertResult<SynthesizedAudio> {
        let request = speech_request(text, voice.unwrap_or(DEFAULT_VOICE));
        let response = self.generate(&self.config.tts_model, &request).await?;

        let inline = response
            .inline_data()
            .ok_or_else(|| ConvertError::RemoteServiceFailure("音声データが返されませんでした".to_string()))?;
        let bytes = BASE64
            .decode(&inline.data)
            .map_err(|e| ConvertError::RemoteServiceFailure(format!("音声データのデコード失敗: {}", e)))?;

        into_playable(bytes, &inline.mime_type)
    }
}

fn transcribe_request(audio: &[u8], mime_hint: Option<&str>, prompt: Option<&str>) -> GenerateContentRequest {
    let mime_type = mime_hint
        .filter(|m| !m.is_empty())
        .unwrap_or(FALLBACK_AUDIO_MIME);

    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![
                Part {
                    inline_data: Some(InlineData {
                        mime_type: mime_type.to_string(),
                        data: BASE64.encode(audio),
                    }),
                    ..Default::default()
                },
                Part {
                    text: Some(prompt.unwrap_or(DEFAULT_TRANSCRIBE_PROMPT).to_string()),
                    ..Default::default()
                },
            ],
        }],
        generation_config: None,
    }
}

fn speech_request(text: &str, voice: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: Some(text.to_string()),
                ..Default::default()
            }],
        }],
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.to_string(),
                    },
                },
            },
        }),
    }
}

/// `audio/L16;codec=pcm;rate=24000` のようなMIMEタイプからレートを取り出す
fn pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// 生PCM (L16) の応答はモノラルWAVに包んで返す
fn into_playable(bytes: Vec<u8>, mime_type: &str) -> ConvertResult<SynthesizedAudio> {
    let essence = mime_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence != "audio/l16" && essence != "audio/pcm" {
        return Ok(SynthesizedAudio {
            bytes,
            mime_type: mime_type.to_string(),
        });
    }

    let rate = pcm_rate(mime_type).unwrap_or(DEFAULT_PCM_RATE);
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(SynthesizedAudio {
        bytes: WavWriter::write_pcm16(&samples, 1, rate)?,
        mime_type: "audio/wav".to_string(),
    })
}
