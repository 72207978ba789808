//! Sharded indexing and search engine
//!
//! Each named index owns N shards, each an independent tantivy index with its
//! own writer lock, commit loop and refresh loop. Mutations are routed to a
//! shard by a hash of the document id; searches fan out to every shard and
//! are merged by score.

mod error;
mod index;
mod schema;
mod search;
mod shard;

pub use error::{EngineError, EngineResult};
pub use index::{shard_for_id, IndexEngine};
pub use schema::{IndexSchema, ResultRow, ALL_COLUMNS, SCORE_COLUMN};
pub use search::{
    apply_relative_cutoff, escape_query, execute, execute_query, merge_top_n, SearchRequest,
    ShardHit,
};
pub use shard::{DocumentCounts, ShardMutation, ShardWriter};
