//! Search profiles
//!
//! A profile's match template is parsed once when the index is loaded. Every
//! profile search fills it from the key/value payload of the request twice:
//! into a boolean query string for display and logs, and into the tantivy
//! query that is actually executed.

mod ast;
mod error;
mod parser;
mod query;
mod render;

pub use ast::{Condition, FieldCondition, GroupNode, Modifier, ProfileNode};
pub use error::{ProfileError, ProfileResult};
pub use parser::parse_template;
pub use query::{build_query, MAX_FUZZY_DISTANCE};
pub use render::{parse_payload, render_nodes, RenderContext, PAYLOAD_SEPARATOR};

use crate::engine::IndexSchema;
use crate::models::{MissingDataStrategy, ProfileSettings};
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::query::Query;
use tracing::{error, warn};

/// A compiled, immutable search profile
#[derive(Debug, Clone)]
pub struct SearchProfile {
    name: String,
    template: String,
    nodes: Vec<ProfileNode>,
    missing_data: MissingDataStrategy,
    relative_cutoff: u32,
    count: usize,
}

impl SearchProfile {
    /// Compile a profile. `resolve_field` maps a template field name to the
    /// name queried in the index, or `None` if the index has no such field.
    pub fn compile(
        settings: &ProfileSettings,
        resolve_field: &dyn Fn(&str) -> Option<String>,
    ) -> ProfileResult<Self> {
        let mut nodes = parse_template(&settings.template)?;

        let mut unknown = None;
        for node in &mut nodes {
            node.for_each_field_mut(&mut |field| match resolve_field(&field.field) {
                Some(resolved) => field.field = resolved,
                None => {
                    unknown.get_or_insert_with(|| field.field.clone());
                }
            });
        }
        if let Some(field) = unknown {
            return Err(ProfileError::UnknownField(field));
        }

        Ok(Self {
            name: settings.name.to_lowercase(),
            template: settings.template.clone(),
            nodes,
            missing_data: settings.missing_data,
            relative_cutoff: settings.relative_cutoff,
            count: settings.count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn nodes(&self) -> &[ProfileNode] {
        &self.nodes
    }

    pub fn missing_data(&self) -> MissingDataStrategy {
        self.missing_data
    }

    pub fn relative_cutoff(&self) -> u32 {
        self.relative_cutoff
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Render the query string for one request
    pub fn render(
        &self,
        payload: &HashMap<String, String>,
        null_value: &str,
    ) -> ProfileResult<String> {
        render_nodes(
            &self.nodes,
            &RenderContext {
                payload,
                strategy: self.missing_data,
                null_value,
            },
        )
    }

    /// Build the executable query for one request; `None` when every clause is dropped
    pub fn build_query(
        &self,
        payload: &HashMap<String, String>,
        null_value: &str,
        schema: &IndexSchema,
    ) -> ProfileResult<Option<Box<dyn Query>>> {
        build_query(
            &self.nodes,
            &RenderContext {
                payload,
                strategy: self.missing_data,
                null_value,
            },
            schema,
        )
    }
}

/// Compiled profiles of one index, in declaration order
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: Vec<Arc<SearchProfile>>,
    failures: Vec<(String, ProfileError)>,
}

impl ProfileSet {
    /// Compile every declared profile. A profile that fails is logged and left
    /// out; if every declared profile fails, the first failure is returned.
    pub fn compile(
        index: &str,
        declared: &[ProfileSettings],
        resolve_field: &dyn Fn(&str) -> Option<String>,
    ) -> ProfileResult<Self> {
        let mut set = Self::default();
        for settings in declared {
            match SearchProfile::compile(settings, resolve_field) {
                Ok(profile) => set.profiles.push(Arc::new(profile)),
                Err(e) => {
                    warn!(index = %index, profile = %settings.name, error = %e, "Profile failed to compile");
                    set.failures.push((settings.name.clone(), e));
                }
            }
        }

        if set.profiles.is_empty() {
            if let Some((name, e)) = set.failures.first() {
                error!(index = %index, profile = %name, "No usable search profile");
                return Err(e.clone());
            }
        }
        Ok(set)
    }

    /// Named profile, or the first declared one when `name` is `None`
    pub fn get(&self, name: Option<&str>) -> Option<Arc<SearchProfile>> {
        match name {
            Some(name) => self
                .profiles
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .cloned(),
            None => self.profiles.first().cloned(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name()).collect()
    }

    /// Profiles rejected at compile time, with their error
    pub fn failures(&self) -> &[(String, ProfileError)] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(name: &str) -> Option<String> {
        match name {
            "name" | "city" => Some(name.to_string()),
            "contactid" => Some("id".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_field_names_resolved() {
        let profile = SearchProfile::compile(
            &ProfileSettings::new("byid", "MUST ContactId<id>"),
            &resolver,
        )
        .unwrap();
        let mut payload = HashMap::new();
        payload.insert("id".to_string(), "c-1".to_string());
        assert_eq!(profile.render(&payload, "null").unwrap(), "+id:(c\\-1)");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = SearchProfile::compile(&ProfileSettings::new("p", "MUST age<a>"), &resolver)
            .unwrap_err();
        assert_eq!(err, ProfileError::UnknownField("age".to_string()));
    }

    #[test]
    fn test_bad_profile_is_excluded() {
        let declared = vec![
            ProfileSettings::new("broken", "MUST name<n> EXACT FUZZY 1"),
            ProfileSettings::new("dedup", "MUST name<n>"),
        ];
        let set = ProfileSet::compile("contacts", &declared, &resolver).unwrap();
        assert_eq!(set.names(), vec!["dedup"]);
        assert_eq!(set.failures().len(), 1);
        assert_eq!(set.get(None).unwrap().name(), "dedup");
        assert!(set.get(Some("broken")).is_none());
        assert!(set.get(Some("DEDUP")).is_some());
    }

    #[test]
    fn test_all_profiles_failing_is_an_error() {
        let declared = vec![ProfileSettings::new("only", "MUST (name<n>")];
        assert!(matches!(
            ProfileSet::compile("contacts", &declared, &resolver),
            Err(ProfileError::Syntax { .. })
        ));

        let empty = ProfileSet::compile("contacts", &[], &resolver).unwrap();
        assert!(empty.is_empty());
        assert!(empty.get(None).is_none());
    }
}
