//! Multi-shard query execution, merge and relative cutoff

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::schema::{IndexSchema, ResultRow};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::Query;
use tantivy::{DocAddress, Searcher, TantivyDocument};

/// Characters escaped in raw query text before parsing
const ESCAPED: [char; 4] = ['\\', '&', '?', '/'];

/// A search against every shard of one index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Total results to return
    pub count: usize,
    /// Percentage of the top score below which hits are dropped; 0 disables
    #[serde(default)]
    pub relative_cutoff: u32,
    /// Document id never returned (self-match suppression)
    #[serde(default)]
    pub exclude_id: Option<String>,
    /// Columns to project besides `id`, `type` and `score`
    #[serde(default)]
    pub columns: Vec<String>,
    /// Query text is already escaped (rendered profile queries)
    #[serde(default)]
    pub pre_escaped: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, count: usize) -> Self {
        Self {
            query: query.into(),
            count,
            ..Self::default()
        }
    }

    pub fn with_cutoff(mut self, cutoff: u32) -> Self {
        self.relative_cutoff = cutoff;
        self
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }

    pub fn pre_escaped(mut self) -> Self {
        self.pre_escaped = true;
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// A hit local to one shard
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardHit {
    pub shard: usize,
    pub score: f32,
    pub address: DocAddress,
}

/// Prefix `\ & ? /` with a backslash
pub fn escape_query(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if ESCAPED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Merge per-shard top lists into one list ranked by descending score.
/// The sort is stable, so equal scores keep shard order.
pub fn merge_top_n(per_shard: Vec<Vec<ShardHit>>, n: usize) -> Vec<ShardHit> {
    let mut merged: Vec<ShardHit> = per_shard.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(n);
    merged
}

/// Keep hits scoring at least `max_score * cutoff / 100`
pub fn apply_relative_cutoff(hits: Vec<ShardHit>, cutoff: u32) -> Vec<ShardHit> {
    if cutoff == 0 || hits.is_empty() {
        return hits;
    }
    let max_score = hits
        .iter()
        .map(|h| h.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let threshold = max_score * cutoff as f32 / 100.0;
    hits.into_iter().filter(|h| h.score >= threshold).collect()
}

/// Parse `request.query` and run it on every searcher.
/// `searchers` is indexed by shard ordinal.
pub fn execute(
    schema: &IndexSchema,
    searchers: &[Searcher],
    request: &SearchRequest,
) -> EngineResult<Vec<ResultRow>> {
    if request.query.trim().is_empty() || request.count == 0 {
        return Ok(Vec::new());
    }

    let parser = schema.query_parser();
    let query = if request.pre_escaped {
        parser.parse_query(&request.query)?
    } else {
        parser.parse_query(&escape_query(&request.query))?
    };
    execute_query(schema, searchers, query.as_ref(), request)
}

/// Run `query` on every searcher in parallel and project the merged hits
pub fn execute_query(
    schema: &IndexSchema,
    searchers: &[Searcher],
    query: &dyn Query,
    request: &SearchRequest,
) -> EngineResult<Vec<ResultRow>> {
    if request.count == 0 || searchers.is_empty() {
        return Ok(Vec::new());
    }

    // One extra hit leaves room for the excluded document.
    let limit = request.count + usize::from(request.exclude_id.is_some());
    let collector = TopDocs::with_limit(limit);

    let per_shard = searchers
        .par_iter()
        .enumerate()
        .map(|(shard, searcher)| {
            searcher
                .search(query, &collector)
                .map(|docs| {
                    docs.into_iter()
                        .map(|(score, address)| ShardHit {
                            shard,
                            score,
                            address,
                        })
                        .collect::<Vec<_>>()
                })
                .map_err(|e| EngineError::SearchFailed(format!("shard {}: {}", shard, e)))
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let hits = apply_relative_cutoff(merge_top_n(per_shard, limit), request.relative_cutoff);

    let mut rows = Vec::with_capacity(hits.len());
    for hit in hits {
        let doc: TantivyDocument = searchers[hit.shard].doc(hit.address)?;
        if let Some(exclude) = &request.exclude_id {
            let excluded = schema
                .document_id(&doc)
                .map(|id| id.eq_ignore_ascii_case(exclude))
                .unwrap_or(false);
            if excluded {
                continue;
            }
        }
        rows.push(schema.project(&doc, &request.columns, hit.score));
        if rows.len() == request.count {
            break;
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(shard: usize, score: f32, doc: u32) -> ShardHit {
        ShardHit {
            shard,
            score,
            address: DocAddress::new(0, doc),
        }
    }

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("a/b & c?"), "a\\/b \\& c\\?");
        assert_eq!(escape_query("back\\slash"), "back\\\\slash");
        assert_eq!(escape_query("+name:(jane)"), "+name:(jane)");
    }

    #[test]
    fn test_merge_matches_global_sort() {
        let shard0 = vec![hit(0, 9.0, 1), hit(0, 8.0, 2), hit(0, 7.0, 3)];
        let shard1 = vec![hit(1, 3.0, 1), hit(1, 2.0, 2)];
        let shard2 = vec![hit(2, 6.0, 1), hit(2, 5.0, 2), hit(2, 4.0, 3)];

        let mut expected: Vec<ShardHit> = shard0
            .iter()
            .chain(shard1.iter())
            .chain(shard2.iter())
            .copied()
            .collect();
        expected.sort_by(|a, b| b.score.total_cmp(&a.score));
        expected.truncate(4);

        let merged = merge_top_n(vec![shard0, shard1, shard2], 4);
        assert_eq!(merged, expected);
        assert_eq!(
            merged.iter().map(|h| h.score).collect::<Vec<_>>(),
            vec![9.0, 8.0, 7.0, 6.0]
        );
    }

    #[test]
    fn test_merge_ties_keep_shard_order() {
        let merged = merge_top_n(vec![vec![hit(0, 1.0, 1)], vec![hit(1, 1.0, 1)]], 10);
        assert_eq!(merged[0].shard, 0);
        assert_eq!(merged[1].shard, 1);
    }

    #[test]
    fn test_relative_cutoff_boundary() {
        let hits = vec![hit(0, 10.0, 1), hit(0, 5.0, 2), hit(1, 4.9, 3)];
        let kept = apply_relative_cutoff(hits, 50);
        assert_eq!(
            kept.iter().map(|h| h.score).collect::<Vec<_>>(),
            vec![10.0, 5.0]
        );
    }

    #[test]
    fn test_relative_cutoff_single_hit_and_disabled() {
        let single = apply_relative_cutoff(vec![hit(0, 0.3, 1)], 100);
        assert_eq!(single.len(), 1);

        let all = apply_relative_cutoff(vec![hit(0, 10.0, 1), hit(0, 0.1, 2)], 0);
        assert_eq!(all.len(), 2);
    }
}
