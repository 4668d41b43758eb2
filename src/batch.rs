use crate::error::{ConvertError, ConvertResult};
use crate::pipeline::ConversionPipeline;
use crate::types::{ConversionRequest, ConversionResult, TargetFormat, TargetSampleRate};
use bytes::Bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// バッチアイテムの状態
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Idle,
    Processing,
    Done,
    Error,
}

/// 入力データの所在
#[derive(Clone, Debug)]
pub enum SourceData {
    /// 実行時に読み込むファイル
    Path(PathBuf),
    /// 読み込み済みのバイト列
    Memory(Bytes),
}

/// バッチ内の1ファイル
#[derive(Clone, Debug)]
pub struct BatchItem {
    pub id: Uuid,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub source: SourceData,
    pub status: ItemStatus,
    /// 0〜100。処理中は単調増加
    pub progress: u8,
    pub result: Option<ConversionResult>,
    pub error: Option<String>,
}

impl BatchItem {
    async fn load_source(&self) -> ConvertResult<Bytes> {
        match &self.source {
            SourceData::Memory(bytes) => Ok(bytes.clone()),
            SourceData::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// バッチ実行時の変換設定
#[derive(Clone, Debug)]
pub struct BatchSettings {
    pub format: TargetFormat,
    pub bitrate_kbps: u32,
    pub sample_rate: TargetSampleRate,
    /// エラー状態のアイテムを再実行するか
    pub retry_errored: bool,
}

/// バッチ完了時の集計
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    /// 完了済み等で今回は実行しなかったアイテム数
    pub skipped: usize,
    /// キャンセルにより未実行のまま残ったアイテム数
    pub cancelled: usize,
    /// RFC 3339
    pub finished_at: String,
}

/// バッチ処理の進行通知を受け取る
pub trait BatchObserver {
    fn on_progress(&mut self, _item: &BatchItem) {}

    /// アイテムが Done または Error になった
    fn on_item_finished(&mut self, _item: &BatchItem) {}

    /// 全アイテムの処理後に1回だけ呼ばれる（失敗やキャンセルがあっても呼ばれる）
    fn on_batch_complete(&mut self, summary: &BatchSummary);
}

/// 通知をログに出すだけのオブザーバー
pub struct LogObserver;

impl BatchObserver for LogObserver {
    fn on_item_finished(&mut self, item: &BatchItem) {
        match item.status {
            ItemStatus::Done => log::info!("✓ {}", item.name),
            _ => log::warn!("✗ {}: {}", item.name, item.error.as_deref().unwrap_or("")),
        }
    }

    fn on_batch_complete(&mut self, summary: &BatchSummary) {
        log::info!(
            "バッチ完了: 成功 {} / 失敗 {} / スキップ {} / キャンセル {}",
            summary.done,
            summary.failed,
            summary.skipped,
            summary.cancelled
        );
    }
}

/// 変換待ちファイルの一覧と逐次実行
#[derive(Debug, Default)]
pub struct Batch {
    items: Vec<BatchItem>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// ファイルを追加
    pub fn add_path(&mut self, path: impl AsRef<Path>) -> std::io::Result<Uuid> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("ファイルではありません: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(self.push(name, metadata.len(), None, SourceData::Path(path.to_path_buf())))
    }

    /// メモリ上のデータを追加
    pub fn add_bytes(&mut self, name: impl Into<String>, data: Bytes, mime_type: Option<String>) -> Uuid {
        let size = data.len() as u64;
        self.push(name.into(), size, mime_type, SourceData::Memory(data))
    }

    fn push(&mut self, name: String, size_bytes: u64, mime_type: Option<String>, source: SourceData) -> Uuid {
        let id = Uuid::new_v4();
        self.items.push(BatchItem {
            id,
            name,
            size_bytes,
            mime_type,
            source,
            status: ItemStatus::Idle,
            progress: 0,
            result: None,
            error: None,
        });
        id
    }

    /// 未処理 (Idle) のアイテムを削除
    ///
    /// 見つからない、または Idle 以外の場合は false。
    pub fn remove(&mut self, id: Uuid) -> bool {
        match self.items.iter().position(|item| item.id == id) {
            Some(index) if self.items[index].status == ItemStatus::Idle => {
                self.items.remove(index);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&BatchItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn should_run(item: &BatchItem, settings: &BatchSettings) -> bool {
        match item.status {
            ItemStatus::Done => false,
            ItemStatus::Error => settings.retry_errored,
            ItemStatus::Idle | ItemStatus::Processing => true,
        }
    }

    /// バッチを1件ずつ実行
    ///
    /// 各アイテムの失敗はそのアイテムに記録され、残りの処理は継続する。
    /// キャンセルはアイテム間（およびパイプラインの段階間）で確認し、
    /// 未実行のアイテムは Idle のまま残す。
    pub async fn run(
        &mut self,
        pipeline: &mut ConversionPipeline,
        settings: &BatchSettings,
        observer: &mut dyn BatchObserver,
    ) -> BatchSummary {
        let mut done = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut cancelled = 0;

        log::info!(
            "バッチ開始: {} 件 → {} ({}Hz)",
            self.items.len(),
            settings.format,
            settings.sample_rate.hz()
        );

        for item in self.items.iter_mut() {
            if !Self::should_run(item, settings) {
                skipped += 1;
                continue;
            }
            if cancelled > 0 || pipeline.is_cancelled() {
                cancelled += 1;
                continue;
            }

            item.status = ItemStatus::Processing;
            item.progress = 0;
            item.result = None;
            item.error = None;
            observer.on_progress(item);

            match Self::run_item(item, pipeline, settings, observer).await {
                Ok(result) => {
                    item.status = ItemStatus::Done;
                    item.progress = 100;
                    item.result = Some(result);
                    done += 1;
                }
                Err(ConvertError::Cancelled) => {
                    item.status = ItemStatus::Idle;
                    item.progress = 0;
                    cancelled += 1;
                    log::warn!("キャンセルされました: {}", item.name);
                    continue;
                }
                Err(e) => {
                    log::error!("変換に失敗 ({}): {}", item.name, e);
                    item.status = ItemStatus::Error;
                    item.error = Some(e.to_string());
                    failed += 1;
                }
            }
            observer.on_item_finished(item);
        }

        let summary = BatchSummary {
            total: self.items.len(),
            done,
            failed,
            skipped,
            cancelled,
            finished_at: chrono::Local::now().to_rfc3339(),
        };
        observer.on_batch_complete(&summary);
        summary
    }

    async fn run_item(
        item: &mut BatchItem,
        pipeline: &mut ConversionPipeline,
        settings: &BatchSettings,
        observer: &mut dyn BatchObserver,
    ) -> ConvertResult<ConversionResult> {
        let request = ConversionRequest {
            source: item.load_source().await?,
            mime_hint: item.mime_type.clone(),
            name_hint: Some(item.name.clone()),
            format: settings.format,
            bitrate_kbps: settings.bitrate_kbps,
            sample_rate: settings.sample_rate,
        };

        pipeline
            .convert(&request, &mut |progress| {
                if progress > item.progress {
                    item.progress = progress;
                    observer.on_progress(item);
                }
            })
            .await
    }
}
