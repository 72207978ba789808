//! Analyzer resolution
//!
//! Maps analyzer ids used by field definitions onto tantivy text analyzers.
//! The built-in ids are always available; an index may declare more as a
//! tokenizer followed by a chain of filters.

mod filters;

pub use filters::LengthFilter;

use crate::models::{AnalyzerSettings, FilterSettings, IndexSettings, SettingsError, TokenizerKind};
use std::collections::HashMap;
use tantivy::tokenizer::{
    AsciiFoldingFilter, Language, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer,
    Stemmer, StopWordFilter, TextAnalyzer, WhitespaceTokenizer,
};

pub const STANDARD: &str = "standard";
pub const KEYWORD: &str = "keyword";
pub const WHITESPACE: &str = "whitespace";
pub use crate::models::NO_ANALYSIS;

const BUILT_IN: [&str; 4] = [STANDARD, KEYWORD, WHITESPACE, NO_ANALYSIS];

/// Analyzers available to one index
#[derive(Debug, Clone, Default)]
pub struct AnalyzerRegistry {
    declared: HashMap<String, AnalyzerSettings>,
}

impl AnalyzerRegistry {
    /// Collect and check the analyzers declared by an index
    pub fn from_settings(settings: &IndexSettings) -> Result<Self, SettingsError> {
        let mut declared = HashMap::new();
        for analyzer in &settings.analyzers {
            let id = analyzer.id.to_lowercase();
            if BUILT_IN.contains(&id.as_str()) {
                return Err(SettingsError::InvalidAnalyzer {
                    analyzer: id,
                    message: "shadows a built-in analyzer".to_string(),
                });
            }
            check_filters(&id, &analyzer.filters)?;
            declared.insert(id, analyzer.clone());
        }

        let registry = Self { declared };
        for field in &settings.fields {
            for id in [field.analyzer.as_str(), field.effective_search_analyzer()] {
                if !registry.contains(id) {
                    return Err(SettingsError::UnknownAnalyzer {
                        field: field.name.clone(),
                        analyzer: id.to_string(),
                    });
                }
            }
        }
        Ok(registry)
    }

    pub fn contains(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        BUILT_IN.contains(&id.as_str()) || self.declared.contains_key(&id)
    }

    /// Whether values analyzed by `id` are kept as a single untouched token
    pub fn is_raw(&self, id: &str) -> bool {
        id.eq_ignore_ascii_case(NO_ANALYSIS)
    }

    /// Build a fresh analyzer instance for `id`
    pub fn build(&self, id: &str) -> Result<TextAnalyzer, SettingsError> {
        let id = id.to_lowercase();
        let analyzer = match id.as_str() {
            STANDARD => TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(RemoveLongFilter::limit(40))
                .filter(LowerCaser)
                .build(),
            KEYWORD => TextAnalyzer::builder(RawTokenizer::default())
                .filter(LowerCaser)
                .build(),
            WHITESPACE => TextAnalyzer::builder(WhitespaceTokenizer::default())
                .filter(LowerCaser)
                .build(),
            NO_ANALYSIS => TextAnalyzer::builder(RawTokenizer::default()).build(),
            _ => {
                let settings =
                    self.declared
                        .get(&id)
                        .ok_or_else(|| SettingsError::InvalidAnalyzer {
                            analyzer: id.clone(),
                            message: "not declared".to_string(),
                        })?;
                build_declared(settings)?
            }
        };
        Ok(analyzer)
    }
}

fn build_declared(settings: &AnalyzerSettings) -> Result<TextAnalyzer, SettingsError> {
    let mut builder = match settings.tokenizer {
        TokenizerKind::Standard => TextAnalyzer::builder(SimpleTokenizer::default()).dynamic(),
        TokenizerKind::Whitespace => {
            TextAnalyzer::builder(WhitespaceTokenizer::default()).dynamic()
        }
        TokenizerKind::Keyword => TextAnalyzer::builder(RawTokenizer::default()).dynamic(),
    };

    for filter in &settings.filters {
        builder = match filter {
            FilterSettings::Lowercase => builder.filter_dynamic(LowerCaser),
            FilterSettings::AsciiFolding => builder.filter_dynamic(AsciiFoldingFilter),
            FilterSettings::Stemmer { language } => {
                builder.filter_dynamic(Stemmer::new(language_for(&settings.id, language)?))
            }
            FilterSettings::StopWords { language, words } => {
                stop_words(&settings.id, language.as_deref(), words)?
                    .into_iter()
                    .fold(builder, |b, f| b.filter_dynamic(f))
            }
            FilterSettings::Length { min, max } => {
                builder.filter_dynamic(LengthFilter::new(*min, *max))
            }
        };
    }

    Ok(builder.build())
}

fn check_filters(id: &str, filters: &[FilterSettings]) -> Result<(), SettingsError> {
    for filter in filters {
        match filter {
            FilterSettings::Stemmer { language } => {
                language_for(id, language)?;
            }
            FilterSettings::StopWords { language, words } => {
                stop_words(id, language.as_deref(), words)?;
            }
            FilterSettings::Length {
                min: Some(min),
                max: Some(max),
            } if min > max => {
                return Err(SettingsError::InvalidAnalyzer {
                    analyzer: id.to_string(),
                    message: format!("length filter min {} exceeds max {}", min, max),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// A language list and a custom list become two chained filters
fn stop_words(
    id: &str,
    language: Option<&str>,
    words: &[String],
) -> Result<Vec<StopWordFilter>, SettingsError> {
    let mut filters = Vec::new();
    if let Some(language) = language {
        let filter = StopWordFilter::new(language_for(id, language)?).ok_or_else(|| {
            SettingsError::InvalidAnalyzer {
                analyzer: id.to_string(),
                message: format!("no stop word list for '{}'", language),
            }
        })?;
        filters.push(filter);
    }
    if !words.is_empty() {
        filters.push(StopWordFilter::remove(
            words.iter().map(|w| w.to_lowercase()).collect::<Vec<_>>(),
        ));
    }
    if filters.is_empty() {
        return Err(SettingsError::InvalidAnalyzer {
            analyzer: id.to_string(),
            message: "stop_words filter needs a language or a word list".to_string(),
        });
    }
    Ok(filters)
}

fn language_for(id: &str, language: &str) -> Result<Language, SettingsError> {
    let lang = match language.to_lowercase().as_str() {
        "arabic" => Language::Arabic,
        "danish" => Language::Danish,
        "dutch" => Language::Dutch,
        "english" => Language::English,
        "finnish" => Language::Finnish,
        "french" => Language::French,
        "german" => Language::German,
        "greek" => Language::Greek,
        "hungarian" => Language::Hungarian,
        "italian" => Language::Italian,
        "norwegian" => Language::Norwegian,
        "portuguese" => Language::Portuguese,
        "romanian" => Language::Romanian,
        "russian" => Language::Russian,
        "spanish" => Language::Spanish,
        "swedish" => Language::Swedish,
        "tamil" => Language::Tamil,
        "turkish" => Language::Turkish,
        other => {
            return Err(SettingsError::InvalidAnalyzer {
                analyzer: id.to_string(),
                message: format!("unsupported language '{}'", other),
            })
        }
    };
    Ok(lang)
}
