use crate::batch::{BatchItem, ItemStatus};
use crate::types::extension_for_mime;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// 出力先ディレクトリ内に作るフォルダ名
pub const OUTPUT_FOLDER: &str = "Convertion";

/// 拡張子を除いたファイル名（最後の `.` より前）
///
/// `.` が無い場合や `.hidden` のように残りが空になる場合は全体を返す。
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) if index > 0 => &name[..index],
        _ => name,
    }
}

/// 完了したアイテムを `<dir>/Convertion/<stem>.<ext>` に書き出す
///
/// Done 以外のアイテムは無視する。拡張子は各結果のMIMEタイプから決める。
/// 書き出したパスを返す。
pub fn export_results(items: &[BatchItem], dir: &Path) -> Result<Vec<PathBuf>> {
    let folder = dir.join(OUTPUT_FOLDER);
    std::fs::create_dir_all(&folder)
        .with_context(|| format!("出力フォルダを作成できません: {}", folder.display()))?;

    let mut written = Vec::new();
    for item in items.iter().filter(|item| item.status == ItemStatus::Done) {
        let Some(result) = &item.result else {
            continue;
        };
        let extension = extension_for_mime(result.mime_type);
        let path = folder.join(format!("{}.{}", file_stem(&item.name), extension));
        std::fs::write(&path, &result.bytes)
            .with_context(|| format!("書き込みに失敗: {}", path.display()))?;
        log::info!("保存: {} ({} バイト)", path.display(), result.bytes.len());
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, BatchSettings, LogObserver};
    use crate::pipeline::tests::{pipeline_with, wav_bytes};
    use crate::lossy_encoder::tests::RecordingBackend;
    use crate::types::{TargetFormat, TargetSampleRate};
    use bytes::Bytes;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("song.mp3"), "song");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem("README"), "README");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(file_stem(".hidden.mp3"), ".hidden");
    }

    #[tokio::test]
    async fn test_export_writes_only_done_items() {
        let mut batch = Batch::new();
        batch.add_bytes("voice.m4a.wav", wav_bytes(16000, 1, 1600), None);
        batch.add_bytes("broken.wav", Bytes::from_static(b"nope"), None);
        batch.add_bytes("music", wav_bytes(44100, 2, 441), None);

        let settings = BatchSettings {
            format: TargetFormat::Wav,
            bitrate_kbps: 128,
            sample_rate: TargetSampleRate::HZ_16000,
            retry_errored: true,
        };
        batch
            .run(&mut pipeline_with(None), &settings, &mut LogObserver)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let written = export_results(batch.items(), dir.path()).unwrap();

        let folder = dir.path().join("Convertion");
        assert_eq!(
            written,
            vec![folder.join("voice.m4a.wav"), folder.join("music.wav")]
        );
        let saved = std::fs::read(&written[0]).unwrap();
        assert_eq!(saved, batch.items()[0].result.as_ref().unwrap().bytes);
        assert!(!folder.join("broken.wav").exists());
    }

    fn settings(format: TargetFormat) -> BatchSettings {
        BatchSettings {
            format,
            bitrate_kbps: 128,
            sample_rate: TargetSampleRate::HZ_16000,
            retry_errored: true,
        }
    }

    #[tokio::test]
    async fn test_dotfile_names_keep_their_own_file() {
        let mut batch = Batch::new();
        batch.add_bytes(".hidden", wav_bytes(16000, 1, 160), None);
        batch.add_bytes(".other", wav_bytes(16000, 1, 160), None);
        batch
            .run(&mut pipeline_with(None), &settings(TargetFormat::Wav), &mut LogObserver)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let written = export_results(batch.items(), dir.path()).unwrap();

        let folder = dir.path().join("Convertion");
        assert_eq!(
            written,
            vec![folder.join(".hidden.wav"), folder.join(".other.wav")]
        );
        assert!(!folder.join(".wav").exists());
    }

    #[tokio::test]
    async fn test_extension_follows_each_result() {
        let mut batch = Batch::new();
        batch.add_bytes("first.wav", wav_bytes(16000, 1, 1600), None);
        let mut pipeline = pipeline_with(Some(RecordingBackend::default()));
        batch
            .run(&mut pipeline, &settings(TargetFormat::Mp3), &mut LogObserver)
            .await;

        // 2回目は別フォーマットだが、完了済みのアイテムは再変換されない
        batch.add_bytes("second.wav", wav_bytes(16000, 1, 1600), None);
        batch
            .run(&mut pipeline, &settings(TargetFormat::Wav), &mut LogObserver)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let written = export_results(batch.items(), dir.path()).unwrap();

        let folder = dir.path().join("Convertion");
        assert_eq!(
            written,
            vec![folder.join("first.mp3"), folder.join("second.wav")]
        );
    }
}
