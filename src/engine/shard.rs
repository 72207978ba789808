//! One on-disk shard: writer, reader and its two background loops

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::schema::IndexSchema;
use crate::metrics::{COMMITS_TOTAL, DOCUMENTS_APPLIED_TOTAL, REFRESHES_TOTAL};
use crate::models::{DocumentOperation, IndexTuning};
use crate::scheduler::{PeriodicTask, TaskState, TickOutcome};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tantivy::directory::MmapDirectory;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, TantivyError};
use tracing::{debug, error, info, warn};

/// Document counters of one shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCounts {
    /// Live documents visible to the current searcher
    pub total: u64,
    /// Operations buffered in the writer since the last commit
    pub ram: u64,
    /// Deleted documents not yet merged away
    pub deleted: u64,
}

impl std::ops::Add for DocumentCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            ram: self.ram + other.ram,
            deleted: self.deleted + other.deleted,
        }
    }
}

/// A ready-to-apply mutation for one shard
#[derive(Debug)]
pub struct ShardMutation {
    pub id: String,
    pub operation: DocumentOperation,
    /// Absent for deletes
    pub document: Option<TantivyDocument>,
}

/// Writer and near-real-time reader for one shard directory.
///
/// The writer holds tantivy's directory lock for the lifetime of the shard.
/// `add_document` and `delete_term` only need a shared borrow, so applies run
/// under the read half of `writer` and commits take the write half.
pub struct ShardWriter {
    index_name: String,
    ordinal: usize,
    path: PathBuf,
    schema: Arc<IndexSchema>,
    writer: RwLock<Option<IndexWriter>>,
    reader: IndexReader,
    pending: AtomicU64,
    refreshes: AtomicU64,
    bulk: AtomicBool,
    closed: AtomicBool,
    commit_task: PeriodicTask,
    refresh_task: PeriodicTask,
}

impl std::fmt::Debug for ShardWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardWriter")
            .field("index", &self.index_name)
            .field("ordinal", &self.ordinal)
            .field("path", &self.path)
            .finish()
    }
}

impl ShardWriter {
    /// Open (or create) the shard at `<data_path>/<index>/<ordinal>/`, take its
    /// directory lock and start both background loops.
    pub fn open(
        data_path: &Path,
        schema: Arc<IndexSchema>,
        ordinal: usize,
        tuning: &IndexTuning,
    ) -> EngineResult<Arc<Self>> {
        let index_name = schema.index_name().to_string();
        let path = data_path.join(&index_name).join(ordinal.to_string());
        let open_error = |message: String| EngineError::ShardOpen {
            index: index_name.clone(),
            shard: ordinal,
            message,
        };

        std::fs::create_dir_all(&path)?;
        let directory = MmapDirectory::open(&path).map_err(|e| open_error(e.to_string()))?;
        let index = Index::open_or_create(directory, schema.schema().clone())
            .map_err(|e| open_error(e.to_string()))?;
        schema.register_tokenizers(&index);

        let writer = index
            .writer_with_num_threads(tuning.indexing_threads.max(1), tuning.writer_heap_size)
            .map_err(|e| match e {
                TantivyError::LockFailure(..) => EngineError::ShardLocked {
                    index: index_name.clone(),
                    shard: ordinal,
                },
                other => open_error(other.to_string()),
            })?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: TantivyError| open_error(e.to_string()))?;

        let commit_interval = Duration::from_secs(tuning.commit_interval_secs.max(1));
        let refresh_interval = Duration::from_millis(tuning.refresh_interval_ms.max(1));
        let task_prefix = format!("{}/{}", index_name, ordinal);

        let shard = Arc::new_cyclic(|weak: &Weak<ShardWriter>| {
            let commit_target = weak.clone();
            let refresh_target = weak.clone();
            ShardWriter {
                index_name: index_name.clone(),
                ordinal,
                path: path.clone(),
                schema,
                writer: RwLock::new(Some(writer)),
                reader,
                pending: AtomicU64::new(0),
                refreshes: AtomicU64::new(0),
                bulk: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                commit_task: PeriodicTask::new(
                    format!("{}/commit", task_prefix),
                    commit_interval,
                    move || commit_tick(&commit_target),
                ),
                refresh_task: PeriodicTask::new(
                    format!("{}/refresh", task_prefix),
                    refresh_interval,
                    move || refresh_tick(&refresh_target),
                ),
            }
        });

        shard.commit_task.start();
        shard.refresh_task.start();

        info!(
            index = %index_name,
            shard = ordinal,
            path = %path.display(),
            "Shard opened"
        );
        Ok(shard)
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_bulk(&self) -> bool {
        self.bulk.load(Ordering::SeqCst)
    }

    /// Number of searcher refreshes performed so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn commit_task_state(&self) -> TaskState {
        self.commit_task.state()
    }

    pub fn refresh_task_state(&self) -> TaskState {
        self.refresh_task.state()
    }

    /// Apply one mutation. Update is delete-by-id followed by add.
    pub fn apply(&self, mutation: ShardMutation) -> EngineResult<()> {
        let guard = self.writer.read();
        let writer = guard.as_ref().ok_or(EngineError::Closed(self.ordinal))?;
        let id_term = self.schema.id_term(&mutation.id);

        match (mutation.operation, mutation.document) {
            (DocumentOperation::Create, Some(doc)) => {
                writer.add_document(doc)?;
            }
            (DocumentOperation::Update, Some(doc)) => {
                writer.delete_term(id_term);
                writer.add_document(doc)?;
            }
            (DocumentOperation::Delete, _) => {
                writer.delete_term(id_term);
            }
            (operation, None) => {
                return Err(EngineError::InvalidDocument {
                    id: mutation.id,
                    message: format!("{} without a document", operation),
                });
            }
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        DOCUMENTS_APPLIED_TOTAL
            .with_label_values(&[&self.index_name, &mutation.operation.to_string()])
            .inc();
        debug!(index = %self.index_name, shard = self.ordinal, doc_id = %mutation.id, operation = %mutation.operation, "Applied mutation");
        Ok(())
    }

    /// Durably flush buffered writes. A closed writer is not an error here.
    pub fn commit(&self) -> EngineResult<()> {
        match self.commit_with_trigger("manual") {
            Err(EngineError::Closed(_)) => {
                debug!(index = %self.index_name, shard = self.ordinal, "Commit skipped, shard closed");
                Ok(())
            }
            other => other,
        }
    }

    /// Commit only when writes are buffered; returns whether a commit happened
    pub fn commit_if_stale(&self) -> EngineResult<bool> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.ordinal));
        }
        if self.pending.load(Ordering::SeqCst) == 0 {
            return Ok(false);
        }
        self.commit_with_trigger("scheduled")?;
        Ok(true)
    }

    fn commit_with_trigger(&self, trigger: &str) -> EngineResult<()> {
        let mut guard = self.writer.write();
        let writer = guard.as_mut().ok_or(EngineError::Closed(self.ordinal))?;
        let opstamp = writer.commit()?;
        self.pending.store(0, Ordering::SeqCst);
        COMMITS_TOTAL
            .with_label_values(&[&self.index_name, trigger])
            .inc();
        debug!(index = %self.index_name, shard = self.ordinal, opstamp, trigger, "Committed");
        Ok(())
    }

    /// Swap in a searcher over the latest commit
    pub fn refresh(&self) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.ordinal));
        }
        self.reader.reload()?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        REFRESHES_TOTAL.with_label_values(&[&self.index_name]).inc();
        Ok(())
    }

    /// Current snapshot-isolated searcher
    pub fn searcher(&self) -> EngineResult<Searcher> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.ordinal));
        }
        Ok(self.reader.searcher())
    }

    pub fn counts(&self) -> DocumentCounts {
        let searcher = self.reader.searcher();
        let deleted = searcher
            .segment_readers()
            .iter()
            .map(|segment| u64::from(segment.num_deleted_docs()))
            .sum();
        DocumentCounts {
            total: searcher.num_docs(),
            ram: self.pending.load(Ordering::SeqCst),
            deleted,
        }
    }

    /// Enter or leave bulk mode.
    ///
    /// Entering stops both loops, wipes the shard, commits and refreshes so the
    /// searcher is an empty view. Leaving commits, refreshes, then restarts the loops.
    pub async fn bulk_index(self: &Arc<Self>, start: bool) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.ordinal));
        }

        if start {
            self.refresh_task.stop().await;
            self.commit_task.stop().await;
            self.bulk.store(true, Ordering::SeqCst);

            let shard = self.clone();
            tokio::task::spawn_blocking(move || shard.wipe())
                .await
                .map_err(|e| EngineError::Tantivy(e.to_string()))??;
            info!(index = %self.index_name, shard = self.ordinal, "Bulk mode started");
        } else {
            let shard = self.clone();
            tokio::task::spawn_blocking(move || {
                shard.commit_with_trigger("bulk")?;
                shard.reader.reload().map_err(EngineError::from)
            })
            .await
            .map_err(|e| EngineError::Tantivy(e.to_string()))??;

            self.bulk.store(false, Ordering::SeqCst);
            self.commit_task.start();
            self.refresh_task.start();
            info!(index = %self.index_name, shard = self.ordinal, "Bulk mode stopped");
        }
        Ok(())
    }

    fn wipe(&self) -> EngineResult<()> {
        {
            let mut guard = self.writer.write();
            let writer = guard.as_mut().ok_or(EngineError::Closed(self.ordinal))?;
            writer.delete_all_documents()?;
            writer.commit()?;
            self.pending.store(0, Ordering::SeqCst);
        }
        COMMITS_TOTAL
            .with_label_values(&[&self.index_name, "bulk"])
            .inc();
        self.reader.reload()?;
        Ok(())
    }

    /// Stop both loops, commit and release the writer. Idempotent.
    ///
    /// The writer is taken out of the shard before committing, so the
    /// directory lock is released when it drops even if the commit fails.
    pub fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.refresh_task.terminate();
        self.commit_task.terminate();

        let Some(mut writer) = self.writer.write().take() else {
            return Ok(());
        };

        let commit = writer.commit();
        let merge = writer.wait_merging_threads();

        match (commit, merge) {
            (Ok(_), Ok(())) => {
                self.pending.store(0, Ordering::SeqCst);
                info!(index = %self.index_name, shard = self.ordinal, "Shard closed");
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(
                    index = %self.index_name,
                    shard = self.ordinal,
                    error = %e,
                    "Shard close failed, writer lock released"
                );
                Err(e.into())
            }
        }
    }
}

fn commit_tick(target: &Weak<ShardWriter>) -> TickOutcome {
    let Some(shard) = target.upgrade() else {
        return TickOutcome::Terminate;
    };
    match shard.commit_if_stale() {
        Ok(_) => TickOutcome::Continue,
        Err(e) if e.is_closed() => TickOutcome::Terminate,
        Err(e) => {
            error!(index = %shard.index_name, shard = shard.ordinal, error = %e, "Scheduled commit failed, stopping commit loop");
            TickOutcome::Terminate
        }
    }
}

fn refresh_tick(target: &Weak<ShardWriter>) -> TickOutcome {
    let Some(shard) = target.upgrade() else {
        return TickOutcome::Terminate;
    };
    match shard.refresh() {
        Ok(()) => TickOutcome::Continue,
        Err(e) if e.is_closed() => TickOutcome::Terminate,
        Err(e) => {
            warn!(index = %shard.index_name, shard = shard.ordinal, error = %e, "Scheduled refresh failed, stopping refresh loop");
            TickOutcome::Terminate
        }
    }
}
