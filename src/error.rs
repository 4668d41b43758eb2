use thiserror::Error;

/// 変換処理のエラー
///
/// 1ファイル分の変換で発生しうる失敗の分類。
/// バッチ処理ではこのエラーを該当アイテムに記録し、残りのアイテムの処理を継続する。
#[derive(Debug, Error)]
pub enum ConvertError {
    /// 入力バイト列が壊れている、または対応していない形式
    #[error("デコードに失敗: {0}")]
    DecodeFailure(String),

    /// 必要なエンコーダーバックエンドが読み込まれていない
    #[error("エンコーダーが利用できません: {0}")]
    EncoderUnavailable(String),

    /// ホストが要求されたコーデックを生成できない
    #[error("この環境では {0} へのエンコードに対応していません。WAV または MP3 を選択してください")]
    UnsupportedFormat(String),

    /// 音声処理コンテキストを確保できない
    #[error("音声処理コンテキストの確保に失敗: {0}")]
    ResourceAcquisitionFailure(String),

    /// 外部サービス呼び出しの失敗（ネットワーク・認証・クォータ）
    #[error("外部サービスの呼び出しに失敗: {0}")]
    RemoteServiceFailure(String),

    /// エンコーダーバックエンドがブロックの処理に失敗
    #[error("エンコードに失敗: {0}")]
    EncodeFailure(String),

    /// キャプチャバックエンドがエラーを報告
    #[error("キャプチャに失敗: {0}")]
    CaptureFailure(String),

    /// キャンセルフラグにより中断
    #[error("変換がキャンセルされました")]
    Cancelled,

    #[error("入出力エラー: {0}")]
    Io(#[from] std::io::Error),

    /// ブロッキングタスクの異常終了
    #[error("内部タスクが異常終了: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type ConvertResult<T> = std::result::Result<T, ConvertError>;
