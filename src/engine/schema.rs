//! Mapping between index settings and the tantivy schema

use crate::analysis::AnalyzerRegistry;
use crate::engine::error::{EngineError, EngineResult};
use crate::models::{
    FieldSettings, FieldType, IndexDocumentRequest, IndexSettings, SettingsError, ID_FIELD,
    TYPE_FIELD,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use tantivy::query::QueryParser;
use tantivy::schema::{
    DateOptions, Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions,
    Value, STORED, STRING,
};
use tantivy::tokenizer::TokenizerManager;
use tantivy::{Index, TantivyDocument, Term};

/// One projected search result: column name to value
pub type ResultRow = BTreeMap<String, String>;

/// Column name carrying the hit score
pub const SCORE_COLUMN: &str = "score";

/// Column list entry that selects every stored field
pub const ALL_COLUMNS: &str = "*";

#[derive(Debug, Clone)]
struct MappedField {
    name: String,
    field: Field,
    field_type: FieldType,
    base_field: Option<String>,
    stored: bool,
    indexed: bool,
    tokenizer: String,
}

/// Schema, tokenizers and document conversion for one index
#[derive(Clone)]
pub struct IndexSchema {
    index_name: String,
    null_value: String,
    primary: Option<String>,
    schema: Schema,
    id_field: Field,
    type_field: Field,
    fields: Vec<MappedField>,
    index_tokenizers: TokenizerManager,
    search_tokenizers: TokenizerManager,
}

impl IndexSchema {
    /// Build the schema and both tokenizer managers from validated settings
    pub fn build(settings: &IndexSettings) -> Result<Self, SettingsError> {
        let analyzers = AnalyzerRegistry::from_settings(settings)?;
        let index_tokenizers = TokenizerManager::default();
        let search_tokenizers = TokenizerManager::default();

        let mut builder = Schema::builder();
        let id_field = builder.add_text_field(ID_FIELD, STRING | STORED);
        let type_field = builder.add_text_field(TYPE_FIELD, STRING | STORED);

        let mut fields = Vec::new();
        for definition in settings.fields.iter().filter(|f| !f.primary) {
            let tokenizer = tokenizer_name(&definition.name);
            let indexed = !definition.do_not_index;
            let field = match definition.field_type {
                FieldType::String => {
                    let mut options = TextOptions::default();
                    if indexed {
                        let record = if analyzers.is_raw(&definition.analyzer) {
                            IndexRecordOption::Basic
                        } else {
                            IndexRecordOption::WithFreqsAndPositions
                        };
                        options = options.set_indexing_options(
                            TextFieldIndexing::default()
                                .set_tokenizer(&tokenizer)
                                .set_index_option(record),
                        );
                    }
                    if definition.store {
                        options = options.set_stored();
                    }
                    index_tokenizers.register(&tokenizer, analyzers.build(&definition.analyzer)?);
                    search_tokenizers.register(
                        &tokenizer,
                        analyzers.build(definition.effective_search_analyzer())?,
                    );
                    builder.add_text_field(&definition.name, options)
                }
                FieldType::Bool => {
                    builder.add_bool_field(&definition.name, numeric_options(definition))
                }
                FieldType::Integer => {
                    builder.add_i64_field(&definition.name, numeric_options(definition))
                }
                FieldType::Float => {
                    builder.add_f64_field(&definition.name, numeric_options(definition))
                }
                FieldType::Date | FieldType::DateTime => {
                    let mut options = DateOptions::default();
                    if indexed {
                        options = options.set_indexed();
                    }
                    if definition.store {
                        options = options.set_stored();
                    }
                    builder.add_date_field(&definition.name, options)
                }
            };

            fields.push(MappedField {
                name: definition.name.clone(),
                field,
                field_type: definition.field_type,
                base_field: definition.base_field.clone(),
                stored: definition.store,
                indexed,
                tokenizer,
            });
        }

        Ok(Self {
            index_name: settings.name.clone(),
            null_value: settings.null_value.clone(),
            primary: settings.primary_field().map(|f| f.name.clone()),
            schema: builder.build(),
            id_field,
            type_field,
            fields,
            index_tokenizers,
            search_tokenizers,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn null_value(&self) -> &str {
        &self.null_value
    }

    pub fn id_field(&self) -> Field {
        self.id_field
    }

    /// Install the index-time analyzers on a shard index
    pub fn register_tokenizers(&self, index: &Index) {
        for mapped in self.fields.iter().filter(|m| m.field_type == FieldType::String) {
            if let Some(analyzer) = self.index_tokenizers.get(&mapped.tokenizer) {
                index.tokenizers().register(&mapped.tokenizer, analyzer);
            }
        }
    }

    /// Term matching the reserved id field
    pub fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.id_field, id)
    }

    /// Name under which a field is queried; the primary field aliases `id`
    pub fn resolve_field_name<'a>(&self, name: &'a str) -> &'a str {
        match &self.primary {
            Some(primary) if primary.eq_ignore_ascii_case(name) => ID_FIELD,
            _ => name,
        }
    }

    /// Whether `name` resolves to a field of this schema
    pub fn has_field(&self, name: &str) -> bool {
        let name = self.resolve_field_name(name);
        name == ID_FIELD || name == TYPE_FIELD || self.mapped(name).is_some()
    }

    /// Run `text` through the search-time analyzer of an indexed text field.
    /// `None` when the field is not an indexed text field; `id` and `type`
    /// are matched verbatim.
    pub fn analyze(&self, name: &str, text: &str) -> Option<(Field, Vec<String>)> {
        let (field, tokenizer) = match self.resolve_field_name(name) {
            ID_FIELD => (self.id_field, "raw"),
            TYPE_FIELD => (self.type_field, "raw"),
            name => {
                let mapped = self
                    .mapped(name)
                    .filter(|m| m.indexed && m.field_type == FieldType::String)?;
                (mapped.field, mapped.tokenizer.as_str())
            }
        };
        let mut analyzer = self.search_tokenizers.get(tokenizer)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Some((field, tokens))
    }

    /// Default fields for free-text terms: every indexed text field plus `id` and `type`
    pub fn queryable_fields(&self) -> Vec<Field> {
        let mut fields = vec![self.id_field, self.type_field];
        fields.extend(
            self.fields
                .iter()
                .filter(|m| m.indexed && m.field_type == FieldType::String)
                .map(|m| m.field),
        );
        fields
    }

    /// Multi-field query parser bound to the search-time analyzers
    pub fn query_parser(&self) -> QueryParser {
        QueryParser::new(
            self.schema.clone(),
            self.queryable_fields(),
            self.search_tokenizers.clone(),
        )
    }

    /// Convert a mutation request into an indexable document
    pub fn to_document(&self, request: &IndexDocumentRequest) -> EngineResult<TantivyDocument> {
        if request.id.trim().is_empty() {
            return Err(EngineError::InvalidDocument {
                id: request.id.clone(),
                message: "document id is blank".to_string(),
            });
        }

        let values: HashMap<String, &str> = request
            .fields
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();

        let mut doc = TantivyDocument::new();
        doc.add_text(self.id_field, &request.id);
        doc.add_text(self.type_field, &self.index_name);

        for mapped in &self.fields {
            let source = mapped.base_field.as_deref().unwrap_or(&mapped.name);
            let value = values
                .get(source)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty());
            self.add_value(&mut doc, mapped, value)
                .map_err(|message| EngineError::InvalidDocument {
                    id: request.id.clone(),
                    message,
                })?;
        }

        Ok(doc)
    }

    fn add_value(
        &self,
        doc: &mut TantivyDocument,
        mapped: &MappedField,
        value: Option<&str>,
    ) -> Result<(), String> {
        let field = mapped.field;
        match (mapped.field_type, value) {
            (FieldType::String, value) => doc.add_text(field, value.unwrap_or(&self.null_value)),
            (_, None) => {}
            (FieldType::Bool, Some(v)) => doc.add_bool(field, parse_bool(v).ok_or_else(|| {
                format!("field '{}': '{}' is not a boolean", mapped.name, v)
            })?),
            (FieldType::Integer, Some(v)) => doc.add_i64(
                field,
                v.parse()
                    .map_err(|_| format!("field '{}': '{}' is not an integer", mapped.name, v))?,
            ),
            (FieldType::Float, Some(v)) => doc.add_f64(
                field,
                v.parse()
                    .map_err(|_| format!("field '{}': '{}' is not a number", mapped.name, v))?,
            ),
            (FieldType::Date, Some(v)) | (FieldType::DateTime, Some(v)) => {
                let parsed = parse_datetime(v)
                    .ok_or_else(|| format!("field '{}': '{}' is not a date", mapped.name, v))?;
                doc.add_date(
                    field,
                    tantivy::DateTime::from_timestamp_micros(parsed.timestamp_micros()),
                );
            }
        }
        Ok(())
    }

    /// Project a stored document into a result row.
    /// `id`, `type` and `score` are always present; other columns only when stored on the document.
    pub fn project(&self, doc: &TantivyDocument, columns: &[String], score: f32) -> ResultRow {
        let mut row = ResultRow::new();
        let id = self.text_value(doc, self.id_field).unwrap_or_default();
        row.insert(
            TYPE_FIELD.to_string(),
            self.text_value(doc, self.type_field).unwrap_or_default(),
        );

        for column in columns {
            let column = column.trim().to_lowercase();
            if column == ALL_COLUMNS {
                for mapped in self.fields.iter().filter(|m| m.stored) {
                    if let Some(value) = self.field_value(doc, mapped) {
                        row.insert(mapped.name.clone(), value);
                    }
                }
                continue;
            }
            if self.resolve_field_name(&column) == ID_FIELD {
                row.insert(column, id.clone());
                continue;
            }
            if let Some(value) = self.mapped(&column).and_then(|m| self.field_value(doc, m)) {
                row.insert(column, value);
            }
        }

        row.insert(ID_FIELD.to_string(), id);
        row.insert(SCORE_COLUMN.to_string(), score.to_string());
        row
    }

    /// Stored id of a document
    pub fn document_id(&self, doc: &TantivyDocument) -> Option<String> {
        self.text_value(doc, self.id_field)
    }

    fn mapped(&self, name: &str) -> Option<&MappedField> {
        self.fields.iter().find(|m| m.name == name)
    }

    fn text_value(&self, doc: &TantivyDocument, field: Field) -> Option<String> {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn field_value(&self, doc: &TantivyDocument, mapped: &MappedField) -> Option<String> {
        let value = doc.get_first(mapped.field)?;
        match mapped.field_type {
            FieldType::String => value.as_str().map(|s| s.to_string()),
            FieldType::Bool => value.as_bool().map(|b| b.to_string()),
            FieldType::Integer => value.as_i64().map(|i| i.to_string()),
            FieldType::Float => value.as_f64().map(|f| f.to_string()),
            FieldType::Date => value.as_datetime().and_then(|dt| {
                DateTime::from_timestamp_micros(dt.into_timestamp_micros())
                    .map(|d| d.format("%Y-%m-%d").to_string())
            }),
            FieldType::DateTime => value.as_datetime().and_then(|dt| {
                DateTime::from_timestamp_micros(dt.into_timestamp_micros())
                    .map(|d| d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }),
        }
    }
}

fn tokenizer_name(field: &str) -> String {
    format!("field_{}", field)
}

fn numeric_options(definition: &FieldSettings) -> NumericOptions {
    let mut options = NumericOptions::default();
    if !definition.do_not_index {
        options = options.set_indexed();
    }
    if definition.store {
        options = options.set_stored();
    }
    options
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or RFC 3339
fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
