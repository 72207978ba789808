//! Rendering a compiled template against a request payload

use super::ast::{FieldCondition, GroupNode, ProfileNode};
use super::error::{ProfileError, ProfileResult};
use crate::models::MissingDataStrategy;
use std::collections::HashMap;

/// Query syntax characters escaped in payload values
const ESCAPED: [char; 19] = [
    '\\', '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':',
    '/',
];

/// Separator between payload entries
pub const PAYLOAD_SEPARATOR: &str = "||";

/// Inputs of one render
pub struct RenderContext<'a> {
    /// Lower-cased placeholder name to value
    pub payload: &'a HashMap<String, String>,
    pub strategy: MissingDataStrategy,
    pub null_value: &'a str,
}

/// Parse `key:value||key:value`; keys are lower-cased, values trimmed
pub fn parse_payload(raw: &str) -> ProfileResult<HashMap<String, String>> {
    let mut payload = HashMap::new();
    for entry in raw.split(PAYLOAD_SEPARATOR) {
        if entry.trim().is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once(':')
            .ok_or_else(|| ProfileError::InvalidPayload(entry.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProfileError::InvalidPayload(entry.to_string()));
        }
        payload.insert(key.to_lowercase(), value.trim().to_string());
    }
    Ok(payload)
}

/// Render every top-level node, dropping clauses and groups that render empty
pub fn render_nodes(nodes: &[ProfileNode], ctx: &RenderContext<'_>) -> ProfileResult<String> {
    let mut clauses = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some(clause) = render_node(node, ctx)? {
            clauses.push(clause);
        }
    }
    Ok(clauses.join(" "))
}

fn render_node(node: &ProfileNode, ctx: &RenderContext<'_>) -> ProfileResult<Option<String>> {
    match node {
        ProfileNode::Field(field) => render_field(field, ctx),
        ProfileNode::Group(group) => render_group(group, ctx),
    }
}

fn render_group(group: &GroupNode, ctx: &RenderContext<'_>) -> ProfileResult<Option<String>> {
    let body = render_nodes(&group.children, ctx)?;
    if body.is_empty() {
        return Ok(None);
    }
    let mut clause = format!("{}({})", group.condition.prefix(), body);
    if let Some(boost) = group.boost {
        clause.push_str(&format!("^{}", boost));
    }
    Ok(Some(clause))
}

/// Value a field condition matches, or `None` when the clause is dropped
pub(super) fn field_value(
    field: &FieldCondition,
    ctx: &RenderContext<'_>,
) -> ProfileResult<Option<String>> {
    if field.is_constant() {
        return Ok(Some(field.placeholder.clone()));
    }
    let value = ctx
        .payload
        .get(&field.placeholder.to_lowercase())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty());
    match (value, ctx.strategy) {
        (Some(value), _) => Ok(Some(value.to_string())),
        (None, MissingDataStrategy::Ignore) => Ok(None),
        (None, MissingDataStrategy::TreatAsNull) => Ok(Some(ctx.null_value.to_string())),
        (None, MissingDataStrategy::Error) => Err(ProfileError::MissingValue {
            field: field.field.clone(),
            placeholder: field.placeholder.clone(),
        }),
    }
}

fn render_field(field: &FieldCondition, ctx: &RenderContext<'_>) -> ProfileResult<Option<String>> {
    let Some(raw) = field_value(field, ctx)? else {
        return Ok(None);
    };

    let mut value = if field.is_exact() {
        format!("\"{}\"", escape_phrase(&raw))
    } else {
        escape_value(&raw)
    };
    if field.is_wildcard() {
        value.push('*');
    } else if let Some(distance) = field.fuzzy() {
        value.push_str(&format!("~{}", distance));
    }

    let mut clause = format!("{}{}:({})", field.condition.prefix(), field.field, value);
    if let Some(boost) = field.boost() {
        clause.push_str(&format!("^{}", boost));
    }
    Ok(Some(clause))
}

pub(super) fn escape_value(value: &str) -> String {
    escape_with(value, &ESCAPED)
}

/// Inside quotes only the quote and the escape character itself are special
fn escape_phrase(value: &str) -> String {
    escape_with(value, &['\\', '"'])
}

fn escape_with(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
