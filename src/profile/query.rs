//! Executable tantivy query built from a compiled template
//!
//! The rendered query string is what gets logged and returned to callers;
//! execution goes through the tree built here, so fuzzy and prefix matching
//! use tantivy's own automaton queries instead of query-string syntax.

use super::ast::{Condition, FieldCondition, GroupNode, ProfileNode};
use super::error::{ProfileError, ProfileResult};
use super::render::{escape_value, field_value, RenderContext};
use crate::engine::IndexSchema;
use tantivy::query::{
    BooleanQuery, BoostQuery, EmptyQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, RegexQuery,
    TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::Term;

/// Largest edit distance the Levenshtein automaton supports
pub const MAX_FUZZY_DISTANCE: u32 = 2;

impl From<Condition> for Occur {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::Must => Occur::Must,
            Condition::MustNot => Occur::MustNot,
            Condition::Should => Occur::Should,
        }
    }
}

/// Build the query for every top-level node. `None` when every clause is dropped.
pub fn build_query(
    nodes: &[ProfileNode],
    ctx: &RenderContext<'_>,
    schema: &IndexSchema,
) -> ProfileResult<Option<Box<dyn Query>>> {
    let clauses = build_clauses(nodes, ctx, schema)?;
    if clauses.is_empty() {
        return Ok(None);
    }
    Ok(Some(Box::new(BooleanQuery::new(clauses))))
}

fn build_clauses(
    nodes: &[ProfileNode],
    ctx: &RenderContext<'_>,
    schema: &IndexSchema,
) -> ProfileResult<Vec<(Occur, Box<dyn Query>)>> {
    let mut clauses = Vec::with_capacity(nodes.len());
    for node in nodes {
        let clause = match node {
            ProfileNode::Field(field) => {
                build_field(field, ctx, schema)?.map(|query| (field.condition.into(), query))
            }
            ProfileNode::Group(group) => {
                build_group(group, ctx, schema)?.map(|query| (group.condition.into(), query))
            }
        };
        clauses.extend(clause);
    }
    Ok(clauses)
}

fn build_group(
    group: &GroupNode,
    ctx: &RenderContext<'_>,
    schema: &IndexSchema,
) -> ProfileResult<Option<Box<dyn Query>>> {
    let clauses = build_clauses(&group.children, ctx, schema)?;
    if clauses.is_empty() {
        return Ok(None);
    }
    Ok(Some(boosted(Box::new(BooleanQuery::new(clauses)), group.boost)))
}

fn build_field(
    field: &FieldCondition,
    ctx: &RenderContext<'_>,
    schema: &IndexSchema,
) -> ProfileResult<Option<Box<dyn Query>>> {
    let Some(value) = field_value(field, ctx)? else {
        return Ok(None);
    };
    let query = match schema.analyze(&field.field, &value) {
        Some((target, tokens)) => match_tokens(field, target, &tokens)?,
        None => parse_typed(field, &value, schema)?,
    };
    Ok(Some(boosted(query, field.boost())))
}

/// Text field: one clause per analyzed token
fn match_tokens(
    field: &FieldCondition,
    target: Field,
    tokens: &[String],
) -> ProfileResult<Box<dyn Query>> {
    let Some((last, leading)) = tokens.split_last() else {
        return Ok(Box::new(EmptyQuery));
    };
    let term = |token: &String| Term::from_field_text(target, token);

    if field.is_exact() && !leading.is_empty() {
        return Ok(Box::new(PhraseQuery::new(tokens.iter().map(term).collect())));
    }

    if let Some(distance) = field.fuzzy() {
        let distance = distance.min(MAX_FUZZY_DISTANCE) as u8;
        return Ok(any_of(
            tokens
                .iter()
                .map(|token| {
                    Box::new(FuzzyTermQuery::new(term(token), distance, true)) as Box<dyn Query>
                })
                .collect(),
        ));
    }

    let mut clauses: Vec<Box<dyn Query>> = leading.iter().map(|t| term_query(term(t))).collect();
    if field.is_wildcard() {
        let pattern = format!("{}.*", regex::escape(last));
        let prefix = RegexQuery::from_pattern(&pattern, target).map_err(|e| {
            ProfileError::InvalidValue {
                field: field.field.clone(),
                message: e.to_string(),
            }
        })?;
        clauses.push(Box::new(prefix));
    } else {
        clauses.push(term_query(term(last)));
    }
    Ok(any_of(clauses))
}

/// Numeric, boolean and date fields go through the query parser for value conversion
fn parse_typed(
    field: &FieldCondition,
    value: &str,
    schema: &IndexSchema,
) -> ProfileResult<Box<dyn Query>> {
    schema
        .query_parser()
        .parse_query(&format!("{}:({})", field.field, escape_value(value)))
        .map_err(|e| ProfileError::InvalidValue {
            field: field.field.clone(),
            message: e.to_string(),
        })
}

fn term_query(term: Term) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
}

/// A single clause as is, several as alternatives
fn any_of(mut clauses: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    if clauses.len() == 1 {
        if let Some(only) = clauses.pop() {
            return only;
        }
    }
    Box::new(BooleanQuery::new(
        clauses.into_iter().map(|q| (Occur::Should, q)).collect(),
    ))
}

fn boosted(query: Box<dyn Query>, boost: Option<u32>) -> Box<dyn Query> {
    match boost {
        Some(boost) => Box::new(BoostQuery::new(query, boost as f32)),
        None => query,
    }
}
