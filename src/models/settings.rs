use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use strum::{Display, EnumString};
use validator::Validate;

/// Reserved field holding the document id
pub const ID_FIELD: &str = "id";

/// Reserved field holding the document type (the index name)
pub const TYPE_FIELD: &str = "type";

/// Analyzer id that stores a field verbatim, without tokenization
pub const NO_ANALYSIS: &str = "noanalysis";

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid name pattern"));

/// Errors raised while loading or validating index settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid settings for index '{index}': {message}")]
    Invalid { index: String, message: String },

    #[error("Duplicate field '{field}' in index '{index}'")]
    DuplicateField { index: String, field: String },

    #[error("Field '{field}' in index '{index}' uses a reserved name")]
    ReservedField { index: String, field: String },

    #[error("Index '{index}' declares more than one primary field")]
    MultiplePrimaryFields { index: String },

    #[error("Computed field '{field}' in index '{index}' references unknown base field '{base}'")]
    UnknownBaseField {
        index: String,
        field: String,
        base: String,
    },

    #[error("Unknown analyzer '{analyzer}' for field '{field}'")]
    UnknownAnalyzer { field: String, analyzer: String },

    #[error("Invalid analyzer '{analyzer}': {message}")]
    InvalidAnalyzer { analyzer: String, message: String },

    #[error("Failed to read settings file {path}: {message}")]
    Load { path: String, message: String },
}

/// Data type of an index field
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Bool,
    Date,
    #[serde(rename = "datetime")]
    #[strum(serialize = "datetime")]
    DateTime,
    Float,
    Integer,
}

/// Policy for a profile field whose value is missing from the request payload
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MissingDataStrategy {
    /// Fail the request, naming the missing field
    Error,
    /// Drop the field clause from the query
    #[default]
    Ignore,
    /// Substitute the index's null sentinel
    TreatAsNull,
}

/// Tokenizer at the head of an analyzer chain
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    Standard,
    Whitespace,
    Keyword,
}

/// Token filter in an analyzer chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSettings {
    Lowercase,
    AsciiFolding,
    Stemmer {
        language: String,
    },
    StopWords {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        words: Vec<String>,
    },
    /// Keeps tokens whose character count lies in `[min, max]`
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
}

/// Analyzer declared by an index
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnalyzerSettings {
    #[validate(length(min = 1, max = 64))]
    pub id: String,

    #[serde(default)]
    pub tokenizer: TokenizerKind,

    #[serde(default)]
    pub filters: Vec<FilterSettings>,
}

/// Field definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FieldSettings {
    /// Field name (case-insensitive, stored lower-case)
    #[validate(length(min = 1, max = 128))]
    pub name: String,

    /// Human readable name
    #[serde(default)]
    pub display_name: Option<String>,

    /// Data type
    #[serde(default, rename = "type")]
    pub field_type: FieldType,

    /// Index-time analyzer id
    #[serde(default = "default_analyzer")]
    pub analyzer: String,

    /// Search-time analyzer id, defaults to the index-time analyzer
    #[serde(default)]
    pub search_analyzer: Option<String>,

    /// Keep the original value in the document store
    #[serde(default = "default_true")]
    pub store: bool,

    /// This field is the document id
    #[serde(default)]
    pub primary: bool,

    /// Computed field: value copied from this base field and analyzed separately
    #[serde(default)]
    pub base_field: Option<String>,

    /// Stored only, never indexed
    #[serde(default)]
    pub do_not_index: bool,
}

impl FieldSettings {
    /// Create a stored string field analyzed with the standard analyzer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            field_type: FieldType::String,
            analyzer: default_analyzer(),
            search_analyzer: None,
            store: true,
            primary: false,
            base_field: None,
            do_not_index: false,
        }
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = analyzer.into();
        self
    }

    pub fn with_search_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.search_analyzer = Some(analyzer.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn computed_from(mut self, base: impl Into<String>) -> Self {
        self.base_field = Some(base.into());
        self
    }

    pub fn do_not_index(mut self) -> Self {
        self.do_not_index = true;
        self
    }

    /// Whether the field is derived from another field
    pub fn is_computed(&self) -> bool {
        self.base_field.is_some()
    }

    /// Analyzer used when parsing queries against this field
    pub fn effective_search_analyzer(&self) -> &str {
        self.search_analyzer.as_deref().unwrap_or(&self.analyzer)
    }
}

/// Search profile declaration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProfileSettings {
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    /// Match template, e.g. `MUST name<name> EXACT SHOULD city<city>`
    #[validate(length(min = 1))]
    pub template: String,

    #[serde(default)]
    pub missing_data: MissingDataStrategy,

    /// Default relative cutoff percentage (0 disables)
    #[serde(default)]
    #[validate(range(max = 100))]
    pub relative_cutoff: u32,

    /// Default number of results
    #[serde(default = "default_count")]
    pub count: usize,
}

impl ProfileSettings {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            missing_data: MissingDataStrategy::default(),
            relative_cutoff: 0,
            count: default_count(),
        }
    }

    pub fn with_missing_data(mut self, strategy: MissingDataStrategy) -> Self {
        self.missing_data = strategy;
        self
    }

    pub fn with_relative_cutoff(mut self, cutoff: u32) -> Self {
        self.relative_cutoff = cutoff;
        self
    }
}

/// Writer, buffer and scheduler tuning for one index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexTuning {
    /// Writer heap per shard in bytes
    #[serde(default = "default_writer_heap")]
    pub writer_heap_size: usize,

    /// Indexing threads per shard writer
    #[serde(default = "default_indexing_threads")]
    pub indexing_threads: usize,

    /// Seconds between scheduled commits
    #[serde(default = "default_commit_interval")]
    pub commit_interval_secs: u64,

    /// Milliseconds between searcher refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    /// Capacity of the inbound request buffer
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    /// Maximum requests transformed concurrently
    #[serde(default = "default_transform_parallelism")]
    pub transform_parallelism: usize,

    /// Capacity of each shard's apply queue
    #[serde(default = "default_apply_buffer")]
    pub apply_buffer: usize,
}

impl Default for IndexTuning {
    fn default() -> Self {
        Self {
            writer_heap_size: default_writer_heap(),
            indexing_threads: default_indexing_threads(),
            commit_interval_secs: default_commit_interval(),
            refresh_interval_ms: default_refresh_interval(),
            inbound_buffer: default_inbound_buffer(),
            transform_parallelism: default_transform_parallelism(),
            apply_buffer: default_apply_buffer(),
        }
    }
}

/// Settings of one named, sharded index
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IndexSettings {
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    #[validate(length(min = 1), nested)]
    pub fields: Vec<FieldSettings>,

    #[serde(default = "default_shards")]
    #[validate(range(min = 1, max = 256))]
    pub shards: usize,

    #[serde(default)]
    pub tuning: IndexTuning,

    /// Sentinel written for missing or blank string fields
    #[serde(default = "default_null_value")]
    pub null_value: String,

    /// Connector used when a request does not name one
    #[serde(default)]
    pub default_connector: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub analyzers: Vec<AnalyzerSettings>,

    #[serde(default)]
    #[validate(nested)]
    pub profiles: Vec<ProfileSettings>,
}

impl IndexSettings {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSettings>) -> Self {
        Self {
            name: name.into(),
            fields,
            shards: default_shards(),
            tuning: IndexTuning::default(),
            null_value: default_null_value(),
            default_connector: None,
            analyzers: Vec::new(),
            profiles: Vec::new(),
        }
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_tuning(mut self, tuning: IndexTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_profile(mut self, profile: ProfileSettings) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerSettings) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    /// Load settings from a JSON or YAML file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let load_error = |message: String| SettingsError::Load {
            path: path.display().to_string(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| load_error(e.to_string()))
            }
            _ => serde_json::from_str(&content).map_err(|e| load_error(e.to_string())),
        }
    }

    /// Lower-case the index, field and analyzer references
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_lowercase();
        for field in &mut self.fields {
            field.name = field.name.trim().to_lowercase();
            field.analyzer = field.analyzer.trim().to_lowercase();
            field.search_analyzer = field
                .search_analyzer
                .take()
                .map(|a| a.trim().to_lowercase());
            field.base_field = field.base_field.take().map(|b| b.trim().to_lowercase());
        }
        for analyzer in &mut self.analyzers {
            analyzer.id = analyzer.id.trim().to_lowercase();
        }
    }

    /// Normalize, then run declarative and structural validation
    pub fn validated(mut self) -> Result<Self, SettingsError> {
        self.normalize();
        self.check()?;
        Ok(self)
    }

    /// Structural validation of the (normalized) settings
    pub fn check(&self) -> Result<(), SettingsError> {
        let invalid = |message: String| SettingsError::Invalid {
            index: self.name.clone(),
            message,
        };

        self.validate().map_err(|e| invalid(e.to_string()))?;

        if !NAME_PATTERN.is_match(&self.name) {
            return Err(invalid(format!("'{}' is not a valid index name", self.name)));
        }

        let mut seen = HashSet::new();
        let mut primary_count = 0;
        for field in &self.fields {
            if !NAME_PATTERN.is_match(&field.name) {
                return Err(invalid(format!("'{}' is not a valid field name", field.name)));
            }
            if field.name == ID_FIELD || field.name == TYPE_FIELD {
                return Err(SettingsError::ReservedField {
                    index: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if !seen.insert(field.name.clone()) {
                return Err(SettingsError::DuplicateField {
                    index: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if field.primary {
                primary_count += 1;
                if field.is_computed() {
                    return Err(invalid(format!(
                        "primary field '{}' cannot be computed",
                        field.name
                    )));
                }
            }
        }

        if primary_count > 1 {
            return Err(SettingsError::MultiplePrimaryFields {
                index: self.name.clone(),
            });
        }

        for field in self.fields.iter().filter(|f| f.is_computed()) {
            let base = field.base_field.as_deref().unwrap_or_default();
            let resolved = self
                .fields
                .iter()
                .find(|f| f.name == base && !f.is_computed());
            if resolved.is_none() {
                return Err(SettingsError::UnknownBaseField {
                    index: self.name.clone(),
                    field: field.name.clone(),
                    base: base.to_string(),
                });
            }
        }

        Ok(())
    }

    /// The field mapped onto the reserved id field, if any
    pub fn primary_field(&self) -> Option<&FieldSettings> {
        self.fields.iter().find(|f| f.primary)
    }

    /// Look up a field by name, case-insensitively
    pub fn field(&self, name: &str) -> Option<&FieldSettings> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Whether `name` can appear in a query (declared field, `id` or `type`)
    pub fn is_queryable_name(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(ID_FIELD)
            || name.eq_ignore_ascii_case(TYPE_FIELD)
            || self.field(name).is_some()
    }
}

fn default_analyzer() -> String {
    "standard".to_string()
}

fn default_true() -> bool {
    true
}

fn default_count() -> usize {
    10
}

fn default_shards() -> usize {
    1
}

fn default_null_value() -> String {
    "null".to_string()
}

fn default_writer_heap() -> usize {
    50_000_000 // 50MB
}

fn default_indexing_threads() -> usize {
    1
}

fn default_commit_interval() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    500
}

fn default_inbound_buffer() -> usize {
    1000
}

fn default_transform_parallelism() -> usize {
    50
}

fn default_apply_buffer() -> usize {
    1000
}
