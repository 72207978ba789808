//! Shared fixtures for the integration tests
#![allow(dead_code)]

use shard_search::engine::IndexEngine;
use shard_search::models::{
    FieldSettings, FieldType, IndexDocumentRequest, IndexSettings, IndexTuning, ProfileSettings,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Tuning with a fast refresh loop and a commit loop that never fires in a test
pub fn test_tuning() -> IndexTuning {
    IndexTuning {
        writer_heap_size: 15_000_000,
        commit_interval_secs: 3600,
        refresh_interval_ms: 50,
        ..IndexTuning::default()
    }
}

/// `contacts` index: `contactid` primary, `name`, `city`, `status`, `age`
pub fn contacts_settings(shards: usize) -> IndexSettings {
    IndexSettings::new(
        "contacts",
        vec![
            FieldSettings::new("contactid").primary(),
            FieldSettings::new("name"),
            FieldSettings::new("city").with_analyzer("keyword"),
            FieldSettings::new("status"),
            FieldSettings::new("age").with_type(FieldType::Integer),
        ],
    )
    .with_shards(shards)
    .with_tuning(test_tuning())
    .with_profile(ProfileSettings::new(
        "dedup",
        "MUST name<name> EXACT SHOULD city<city>",
    ))
}

pub async fn open_contacts(data_path: &Path, shards: usize) -> Arc<IndexEngine> {
    let settings = contacts_settings(shards).validated().unwrap();
    IndexEngine::initialize(settings, data_path).await.unwrap()
}

pub fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn contact(id: &str, name: &str, city: &str) -> IndexDocumentRequest {
    IndexDocumentRequest::create(id, fields(&[("name", name), ("city", city)]))
}

/// Flush the pipeline, commit and refresh so everything enqueued is searchable
pub async fn make_visible(engine: &IndexEngine) {
    engine.flush().await;
    engine.commit().await.unwrap();
    engine.refresh().await.unwrap();
}
