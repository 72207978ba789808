//! Index engine: shard routing, the ingestion pipeline and index lifecycle

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::schema::{IndexSchema, ResultRow};
use crate::engine::search::{self, SearchRequest};
use crate::engine::shard::{DocumentCounts, ShardMutation, ShardWriter};
use crate::metrics::{BULK_MODE, PIPELINE_FAILURES_TOTAL, SEARCHES_TOTAL, SEARCH_DURATION_SECONDS};
use crate::models::{DocumentOperation, IndexDocumentRequest, IndexSettings, SettingsError};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tantivy::query::Query;
use tantivy::Searcher;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Shard owning document `id` among `shard_count` shards
pub fn shard_for_id(id: &str, shard_count: usize) -> usize {
    let digest = Sha256::digest(id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count.max(1) as u64) as usize
}

/// Counters that let `flush` wait for the pipeline to settle
struct Progress {
    enqueued: AtomicU64,
    settled: watch::Sender<u64>,
}

impl Progress {
    fn settle(&self) {
        self.settled.send_modify(|n| *n += 1);
    }
}

/// Shuts the transform gate until dropped
struct GateHold(Arc<watch::Sender<bool>>);

impl GateHold {
    fn shut(gate: &Arc<watch::Sender<bool>>) -> Self {
        gate.send_replace(true);
        Self(gate.clone())
    }
}

impl Drop for GateHold {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Owns every shard of one named index and the pipeline feeding them.
///
/// Requests flow through a bounded inbound queue, a transform stage with
/// bounded concurrency that keeps arrival order, and one apply queue per shard.
/// Transforms wait on `gate` while a commit or bulk switch is in progress.
/// Both run as detached tasks, so dropping the caller's future never leaves
/// the gate shut or the shards half switched.
pub struct IndexEngine {
    settings: Arc<IndexSettings>,
    schema: Arc<IndexSchema>,
    shards: Vec<Arc<ShardWriter>>,
    inbound: parking_lot::Mutex<Option<mpsc::Sender<IndexDocumentRequest>>>,
    gate: Arc<watch::Sender<bool>>,
    progress: Arc<Progress>,
    bulk: Arc<AtomicBool>,
    lifecycle: Arc<Mutex<()>>,
    closed: Arc<AtomicBool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEngine")
            .field("index", &self.settings.name)
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl IndexEngine {
    /// Open every shard and start the pipeline.
    ///
    /// Any shard failure is fatal for the whole index: shards opened so far are
    /// closed again, releasing their locks, and the error is returned.
    pub async fn initialize(settings: IndexSettings, data_path: &Path) -> EngineResult<Arc<Self>> {
        if settings.shards == 0 {
            return Err(EngineError::Settings(SettingsError::Invalid {
                index: settings.name.clone(),
                message: "shard count must be at least 1".to_string(),
            }));
        }

        let schema = Arc::new(IndexSchema::build(&settings)?);
        let mut shards = Vec::with_capacity(settings.shards);
        for ordinal in 0..settings.shards {
            let opened = {
                let data_path = data_path.to_path_buf();
                let schema = schema.clone();
                let tuning = settings.tuning.clone();
                tokio::task::spawn_blocking(move || ShardWriter::open(&data_path, schema, ordinal, &tuning))
                    .await
                    .map_err(|e| EngineError::Tantivy(e.to_string()))
                    .and_then(|opened| opened)
            };
            match opened {
                Ok(shard) => shards.push(shard),
                Err(e) => {
                    error!(index = %settings.name, shard = ordinal, error = %e, "Shard failed to open, aborting index");
                    for opened in &shards {
                        if let Err(close_error) = opened.close() {
                            warn!(index = %settings.name, shard = opened.ordinal(), error = %close_error, "Failed to close sibling shard");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(settings.tuning.inbound_buffer.max(1));
        let (gate, _) = watch::channel(false);
        let (settled, _) = watch::channel(0u64);
        let progress = Arc::new(Progress {
            enqueued: AtomicU64::new(0),
            settled,
        });

        let engine = Arc::new(Self {
            settings: Arc::new(settings),
            schema,
            shards,
            inbound: parking_lot::Mutex::new(Some(inbound_tx)),
            gate: Arc::new(gate),
            progress,
            bulk: Arc::new(AtomicBool::new(false)),
            lifecycle: Arc::new(Mutex::new(())),
            closed: Arc::new(AtomicBool::new(false)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });
        engine.start_pipeline(inbound_rx);

        info!(
            index = %engine.settings.name,
            shards = engine.shards.len(),
            "Index engine initialized"
        );
        Ok(engine)
    }

    fn start_pipeline(&self, inbound_rx: mpsc::Receiver<IndexDocumentRequest>) {
        let index = self.settings.name.clone();
        let mut apply_queues = Vec::with_capacity(self.shards.len());
        let mut tasks = self.tasks.lock();

        for shard in &self.shards {
            let (tx, mut rx) = mpsc::channel::<ShardMutation>(self.settings.tuning.apply_buffer.max(1));
            apply_queues.push(tx);

            let shard = shard.clone();
            let progress = self.progress.clone();
            let index = index.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                while let Some(mutation) = rx.blocking_recv() {
                    let id = mutation.id.clone();
                    if let Err(e) = shard.apply(mutation) {
                        PIPELINE_FAILURES_TOTAL
                            .with_label_values(&[&index, "apply"])
                            .inc();
                        error!(index = %index, shard = shard.ordinal(), doc_id = %id, error = %e, "Failed to apply mutation");
                    }
                    progress.settle();
                }
                debug!(index = %index, shard = shard.ordinal(), "Apply queue drained");
            }));
        }

        let schema = self.schema.clone();
        let gate = self.gate.subscribe();
        let progress = self.progress.clone();
        let parallelism = self.settings.tuning.transform_parallelism.max(1);
        let shard_count = self.shards.len();

        tasks.push(tokio::spawn(async move {
            ReceiverStream::new(inbound_rx)
                .map(|request| {
                    let schema = schema.clone();
                    let mut gate = gate.clone();
                    tokio::spawn(async move {
                        // A closed gate sender means the engine is gone; transform anyway.
                        let _ = gate.wait_for(|busy| !*busy).await;
                        let shard = shard_for_id(&request.id, shard_count);
                        transform(&schema, request).map(|mutation| (shard, mutation))
                    })
                })
                .buffered(parallelism)
                .for_each(|outcome| {
                    let apply_queues = &apply_queues;
                    let progress = &progress;
                    let index = &index;
                    async move {
                        let failure = match outcome {
                            Ok(Ok((shard, mutation))) => match apply_queues[shard].send(mutation).await {
                                Ok(()) => return,
                                Err(_) => "apply queue closed".to_string(),
                            },
                            Ok(Err(e)) => e.to_string(),
                            Err(join_error) => join_error.to_string(),
                        };
                        PIPELINE_FAILURES_TOTAL
                            .with_label_values(&[index, "transform"])
                            .inc();
                        warn!(index = %index, error = %failure, "Dropped mutation request");
                        progress.settle();
                    }
                })
                .await;
            debug!(index = %index, "Inbound queue drained");
        }));
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, ordinal: usize) -> Option<&Arc<ShardWriter>> {
        self.shards.get(ordinal)
    }

    /// Shard that owns `id`
    pub fn shard_for_id(&self, id: &str) -> usize {
        shard_for_id(id, self.shards.len())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Steady-state bulk flag; flips only after every shard has switched
    pub fn is_bulk(&self) -> bool {
        self.bulk.load(Ordering::SeqCst)
    }

    /// Accept a request into the inbound queue, waiting while it is full
    pub async fn enqueue(&self, request: IndexDocumentRequest) -> EngineResult<()> {
        let sender = self
            .inbound
            .lock()
            .clone()
            .ok_or_else(|| EngineError::ShutDown(self.settings.name.clone()))?;

        self.progress.enqueued.fetch_add(1, Ordering::SeqCst);
        if sender.send(request).await.is_err() {
            self.progress.enqueued.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::ShutDown(self.settings.name.clone()));
        }
        Ok(())
    }

    /// Wait until every request enqueued so far has been applied or dropped
    pub async fn flush(&self) {
        let target = self.progress.enqueued.load(Ordering::SeqCst);
        let mut settled = self.progress.settled.subscribe();
        let _ = settled.wait_for(|n| *n >= target).await;
    }

    /// Commit every shard. Transforms hold off until it completes.
    pub async fn commit(&self) -> EngineResult<()> {
        let lifecycle = self.lifecycle.clone();
        let gate = self.gate.clone();
        let shards = self.shards.clone();
        let task = tokio::spawn(async move {
            let _lifecycle = lifecycle.lock_owned().await;
            let _hold = GateHold::shut(&gate);
            tokio::task::spawn_blocking(move || shards.iter().try_for_each(|shard| shard.commit()))
                .await
                .map_err(|e| EngineError::Tantivy(e.to_string()))?
        });
        task.await.map_err(|e| EngineError::Tantivy(e.to_string()))?
    }

    /// Refresh the searcher of every shard
    pub async fn refresh(&self) -> EngineResult<()> {
        let shards = self.shards.clone();
        tokio::task::spawn_blocking(move || shards.iter().try_for_each(|shard| shard.refresh()))
            .await
            .map_err(|e| EngineError::Tantivy(e.to_string()))?
    }

    /// Switch every shard into or out of bulk mode.
    ///
    /// Enqueue keeps accepting requests meanwhile; transforms wait for the switch.
    pub async fn bulk_indexing(&self, enable: bool) -> EngineResult<()> {
        let lifecycle = self.lifecycle.clone();
        let gate = self.gate.clone();
        let shards = self.shards.clone();
        let bulk = self.bulk.clone();
        let closed = self.closed.clone();
        let name = self.settings.name.clone();

        let task = tokio::spawn(async move {
            let _lifecycle = lifecycle.lock_owned().await;
            if closed.load(Ordering::SeqCst) {
                return Err(EngineError::ShutDown(name));
            }

            {
                let _hold = GateHold::shut(&gate);
                futures::future::try_join_all(shards.iter().map(|shard| shard.bulk_index(enable)))
                    .await?;
            }

            bulk.store(enable, Ordering::SeqCst);
            BULK_MODE
                .with_label_values(&[&name])
                .set(if enable { 1.0 } else { 0.0 });
            info!(index = %name, enable, "Bulk indexing switched");
            Ok(())
        });
        task.await.map_err(|e| EngineError::Tantivy(e.to_string()))?
    }

    /// Document counts summed across shards
    pub fn counts(&self) -> DocumentCounts {
        self.shards
            .iter()
            .map(|shard| shard.counts())
            .fold(DocumentCounts::default(), |acc, c| acc + c)
    }

    /// Current searcher of every shard, indexed by shard ordinal
    pub fn index_searchers(&self) -> EngineResult<Vec<Searcher>> {
        self.shards.iter().map(|shard| shard.searcher()).collect()
    }

    /// Execute a search across all shards. `kind` labels the search metrics.
    pub async fn search(&self, request: SearchRequest, kind: &str) -> EngineResult<Vec<ResultRow>> {
        self.run_search(kind, move |schema, searchers| {
            search::execute(schema, searchers, &request)
        })
        .await
    }

    /// Execute an already built query. `request.query` is kept for logging only.
    pub async fn search_query(
        &self,
        query: Box<dyn Query>,
        request: SearchRequest,
        kind: &str,
    ) -> EngineResult<Vec<ResultRow>> {
        debug!(index = %self.settings.name, query = %request.query, kind, "Executing built query");
        self.run_search(kind, move |schema, searchers| {
            search::execute_query(schema, searchers, query.as_ref(), &request)
        })
        .await
    }

    async fn run_search<F>(&self, kind: &str, run: F) -> EngineResult<Vec<ResultRow>>
    where
        F: FnOnce(&IndexSchema, &[Searcher]) -> EngineResult<Vec<ResultRow>> + Send + 'static,
    {
        let started = Instant::now();
        let searchers = self.index_searchers()?;
        let schema = self.schema.clone();
        let rows = tokio::task::spawn_blocking(move || run(&schema, &searchers))
            .await
            .map_err(|e| EngineError::SearchFailed(e.to_string()))??;

        SEARCHES_TOTAL
            .with_label_values(&[&self.settings.name, kind])
            .inc();
        SEARCH_DURATION_SECONDS
            .with_label_values(&[&self.settings.name])
            .observe(started.elapsed().as_secs_f64());
        Ok(rows)
    }

    /// Stop accepting requests, drain the pipeline and close every shard.
    /// Idempotent.
    pub async fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _lifecycle = self.lifecycle.lock().await;

        // Dropping the only sender ends the inbound stream, which in turn
        // drops the apply queue senders once in-flight requests are forwarded.
        self.inbound.lock().take();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(index = %self.settings.name, error = %e, "Pipeline task ended abnormally");
            }
        }

        let shards = self.shards.clone();
        let name = self.settings.name.clone();
        tokio::task::spawn_blocking(move || {
            let mut first_error = None;
            for shard in &shards {
                if let Err(e) = shard.close() {
                    error!(index = %name, shard = shard.ordinal(), error = %e, "Failed to close shard");
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
        .await
        .map_err(|e| EngineError::Tantivy(e.to_string()))??;

        info!(index = %self.settings.name, "Index engine closed");
        Ok(())
    }
}

/// Build the shard mutation for a request; deletes carry no document
fn transform(schema: &IndexSchema, request: IndexDocumentRequest) -> EngineResult<ShardMutation> {
    let document = match request.operation {
        DocumentOperation::Delete => None,
        DocumentOperation::Create | DocumentOperation::Update => Some(schema.to_document(&request)?),
    };
    Ok(ShardMutation {
        id: request.id,
        operation: request.operation,
        document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_is_deterministic() {
        for id in ["a", "contact-42", "ÜNICODE", ""] {
            let first = shard_for_id(id, 7);
            assert!(first < 7);
            assert_eq!(first, shard_for_id(id, 7));
        }
        assert_eq!(shard_for_id("anything", 1), 0);
    }

    #[test]
    fn test_routing_spreads_ids() {
        let mut used = std::collections::HashSet::new();
        for i in 0..200 {
            used.insert(shard_for_id(&format!("doc-{}", i), 4));
        }
        assert_eq!(used.len(), 4);
    }
}
