use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Mutation applied to a document
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentOperation {
    #[default]
    Create,
    Update,
    Delete,
}

/// A document mutation produced by a connector or the document operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDocumentRequest {
    /// Document id, routes the request to a shard
    pub id: String,

    /// Field values keyed by field name
    #[serde(default)]
    pub fields: HashMap<String, String>,

    #[serde(default)]
    pub operation: DocumentOperation,
}

impl IndexDocumentRequest {
    pub fn create(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
            operation: DocumentOperation::Create,
        }
    }

    pub fn update(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
            operation: DocumentOperation::Update,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: HashMap::new(),
            operation: DocumentOperation::Delete,
        }
    }
}

/// Kind of connector run
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IndexRequestType {
    /// Full reload: the index is wiped and refilled in bulk mode
    #[default]
    Bulk,
    /// Incremental load into the live index
    Single,
}

/// Instruction handed to a connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    /// Job id under which status updates are posted
    pub request_id: String,

    pub request_type: IndexRequestType,

    pub index_name: String,

    /// Connector specific parameters (e.g. `path`)
    #[serde(default)]
    pub params: HashMap<String, String>,
}
