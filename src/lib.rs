//! audio-alchemy - 音声ファイルの一括変換ツール
//!
//! 任意の入力音声をデコードし、指定したサンプリングレートにリサンプルして、
//! WAV / FLAC / MP3 / WebM / OGG / AAC に書き出す。
//! 複数ファイルを1件ずつ処理し、ファイル毎の進捗と失敗を記録する。
//!
//! # 主な機能
//!
//! - **デコード**: symphonia による形式判定とデコード（非対応のコーデックは ffmpeg）
//! - **リサンプル**: rubato の窓付きsinc補間（16000 / 22050 / 44100 / 48000 Hz）
//! - **WAV出力**: 16ビットPCM、ヘッダーを含めビット単位で決定的
//! - **FLAC出力**: flacenc による可逆圧縮
//! - **MP3出力**: 差し替え可能なエンコーダーバックエンド（LAME）
//! - **録音系フォーマット**: ffmpeg にPCMを流し込んで WebM / OGG / AAC を生成
//! - **バッチ処理**: 失敗の分離、再実行、キャンセル、完了通知
//! - **外部サービス**: Gemini による文字起こしと音声合成
//!
//! # アーキテクチャ
//!
//! ```text
//! [Batch] → [ConversionPipeline] ─ ProcessingContext (ContextPool)
//!                 │
//!                 ├─ decode (symphonia / ffmpeg) → 10 → 30
//!                 ├─ render (rubato)             → 60
//!                 └─ encode
//!                      ├─ WavWriter              → 100
//!                      ├─ FlacEncoder            → 100
//!                      ├─ LossyEncoderAdapter    → 60..100
//!                      │     └─ EncoderBackend (LAME)
//!                      └─ StreamingCaptureEncoder → 100
//!                            └─ CaptureBackend (ffmpeg)
//!                 ↓
//!          [export] → <output_dir>/Convertion/<stem>.<ext>
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use audio_alchemy::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod batch;
pub mod capture;
pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod export;
pub mod ffmpeg_capture;
pub mod ffmpeg_decoder;
pub mod flac_encoder;
pub mod gemini;
#[cfg(feature = "mp3")]
pub mod lame_backend;
pub mod lossy_encoder;
pub mod pipeline;
pub mod remote;
pub mod resampler;
pub mod types;
pub mod wav_writer;
