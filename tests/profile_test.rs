//! Search profiles compiled against a live index

mod common;

use common::*;
use shard_search::engine::{IndexEngine, ResultRow, SearchRequest};
use shard_search::models::{MissingDataStrategy, ProfileSettings};
use shard_search::profile::{parse_payload, ProfileError, ProfileSet, SearchProfile};
use std::sync::Arc;
use tempfile::TempDir;

fn compile(engine: &IndexEngine, settings: &ProfileSettings) -> Result<SearchProfile, ProfileError> {
    let schema = engine.schema().clone();
    SearchProfile::compile(settings, &move |name: &str| {
        schema
            .has_field(name)
            .then(|| schema.resolve_field_name(name).to_string())
    })
}

/// Single shard so every document shares term statistics
async fn seeded(dir: &TempDir) -> Arc<IndexEngine> {
    let engine = open_contacts(dir.path(), 1).await;
    engine.enqueue(contact("p1", "Jane Doe", "Paris")).await.unwrap();
    engine.enqueue(contact("p2", "Jane Doe", "Berlin")).await.unwrap();
    engine.enqueue(contact("p3", "Jane Smith", "Paris")).await.unwrap();
    engine.enqueue(contact("p4", "John Doe", "Madrid")).await.unwrap();
    make_visible(&engine).await;
    engine
}

/// Render for display, execute the built query
async fn run(engine: &IndexEngine, profile: &SearchProfile, payload: &str) -> (String, Vec<ResultRow>) {
    let payload = parse_payload(payload).unwrap();
    let query = profile.render(&payload, "null").unwrap();
    let built = profile
        .build_query(&payload, "null", engine.schema())
        .unwrap()
        .unwrap();
    let rows = engine
        .search_query(built, SearchRequest::new(query.clone(), 10), "profile")
        .await
        .unwrap();
    (query, rows)
}

fn sorted_ids(rows: &[ResultRow]) -> Vec<&str> {
    let mut ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_rendered_query_parses_and_matches() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let settings = ProfileSettings::new("dedup", "MUST name<name> EXACT SHOULD city<city>");
    let profile = compile(&engine, &settings).unwrap();

    let query = profile
        .render(&parse_payload("name:Jane Doe").unwrap(), "null")
        .unwrap();
    assert_eq!(query, "+name:(\"Jane Doe\")");
    assert!(engine.schema().query_parser().parse_query(&query).is_ok());

    let rows = engine
        .search(SearchRequest::new(query, 10).pre_escaped(), "profile")
        .await
        .unwrap();
    let mut ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["p1", "p2"]);

    // The SHOULD clause ranks the matching city first.
    let query = profile
        .render(&parse_payload("name:Jane Doe||city:Berlin").unwrap(), "null")
        .unwrap();
    let rows = engine
        .search(SearchRequest::new(query, 10).pre_escaped(), "profile")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "p2");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_must_not_and_self_exclusion() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let settings = ProfileSettings::new("others", "MUST name<name> MUSTNOT city<city>");
    let profile = compile(&engine, &settings).unwrap();
    let query = profile
        .render(&parse_payload("name:jane||city:paris").unwrap(), "null")
        .unwrap();
    assert_eq!(query, "+name:(jane) -city:(paris)");

    let rows = engine
        .search(SearchRequest::new(query.clone(), 10).pre_escaped(), "profile")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "p2");

    let rows = engine
        .search(
            SearchRequest::new(query, 10).pre_escaped().excluding("P2"),
            "profile",
        )
        .await
        .unwrap();
    assert!(rows.is_empty());

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_primary_field_resolves_to_id() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let settings = ProfileSettings::new("byid", "MUST contactid<key>");
    let profile = compile(&engine, &settings).unwrap();
    let query = profile
        .render(&parse_payload("key:p3").unwrap(), "null")
        .unwrap();
    assert_eq!(query, "+id:(p3)");

    let rows = engine
        .search(SearchRequest::new(query, 10).pre_escaped(), "profile")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "p3");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_value_with_error_strategy() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let settings = ProfileSettings::new("strict", "MUST name<name> MUST city<city>")
        .with_missing_data(MissingDataStrategy::Error);
    let profile = compile(&engine, &settings).unwrap();

    let err = profile
        .render(&parse_payload("name:Jane").unwrap(), "null")
        .unwrap_err();
    assert!(matches!(err, ProfileError::MissingValue { ref field, .. } if field == "city"));

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_field_fails_compile() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 1).await;

    let settings = ProfileSettings::new("bad", "MUST nickname<n>");
    assert_eq!(
        compile(&engine, &settings).unwrap_err(),
        ProfileError::UnknownField("nickname".to_string())
    );

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_profile_set_skips_broken_profiles() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 1).await;
    let schema = engine.schema().clone();
    let resolve = move |name: &str| {
        schema
            .has_field(name)
            .then(|| schema.resolve_field_name(name).to_string())
    };

    let declared = vec![
        ProfileSettings::new("Broken", "MUST name<n> EXACT WILDCARD"),
        ProfileSettings::new("Names", "name<n>"),
        ProfileSettings::new("Cities", "city<c>"),
    ];
    let set = ProfileSet::compile("contacts", &declared, &resolve).unwrap();
    assert_eq!(set.names(), vec!["names", "cities"]);
    assert_eq!(set.failures().len(), 1);
    assert_eq!(set.get(None).unwrap().name(), "names");
    assert_eq!(set.get(Some("CITIES")).unwrap().name(), "cities");
    assert!(set.get(Some("broken")).is_none());

    let all_broken = vec![ProfileSettings::new("bad", "MUST nickname<n>")];
    assert!(ProfileSet::compile("contacts", &all_broken, &resolve).is_err());

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_fuzzy_matches_one_edit_variant() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let profile = compile(&engine, &ProfileSettings::new("fuzzy", "MUST name<n> FUZZY 1")).unwrap();
    let (query, rows) = run(&engine, &profile, "n:Smyth").await;
    assert_eq!(query, "+name:(Smyth~1)");
    assert_eq!(sorted_ids(&rows), vec!["p3"]);

    let (_, rows) = run(&engine, &profile, "n:Jahn").await;
    assert_eq!(sorted_ids(&rows), vec!["p4"]);

    // Two edits away is out of reach at distance 1.
    let (_, rows) = run(&engine, &profile, "n:Smythe").await;
    assert!(rows.is_empty());

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_matches_prefix() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let profile = compile(&engine, &ProfileSettings::new("prefix", "MUST name<n> WILDCARD")).unwrap();
    let (query, rows) = run(&engine, &profile, "n:Smi").await;
    assert_eq!(query, "+name:(Smi*)");
    assert_eq!(sorted_ids(&rows), vec!["p3"]);

    let (_, rows) = run(&engine, &profile, "n:Jo").await;
    assert_eq!(sorted_ids(&rows), vec!["p4"]);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_constant_clause_ignores_payload() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let settings = ProfileSettings::new("elsewhere", "MUST type<contacts> CONSTANT MUSTNOT city<c>")
        .with_missing_data(MissingDataStrategy::Error);
    let profile = compile(&engine, &settings).unwrap();
    let (query, rows) = run(&engine, &profile, "c:Paris").await;
    assert_eq!(query, "+type:(contacts) -city:(Paris)");
    assert_eq!(sorted_ids(&rows), vec!["p2", "p4"]);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_group_boost_decides_ranking() {
    let dir = TempDir::new().unwrap();
    let engine = seeded(&dir).await;

    let names_first = compile(
        &engine,
        &ProfileSettings::new("names", "SHOULD (name<n>) BOOST 10 SHOULD (city<c>)"),
    )
    .unwrap();
    let (query, rows) = run(&engine, &names_first, "n:Smith||c:Berlin").await;
    assert_eq!(query, "(name:(Smith))^10 (city:(Berlin))");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "p3");

    let cities_first = compile(
        &engine,
        &ProfileSettings::new("cities", "SHOULD (name<n>) SHOULD (city<c>) BOOST 10"),
    )
    .unwrap();
    let (_, rows) = run(&engine, &cities_first, "n:Smith||c:Berlin").await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "p2");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_query_syntax_in_values() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 1).await;
    engine.enqueue(contact("q1", "Tom O\"Brien", "10:30")).await.unwrap();
    engine.enqueue(contact("q2", "a^b [c]", "Cork")).await.unwrap();
    make_visible(&engine).await;

    let profile = compile(
        &engine,
        &ProfileSettings::new("syntax", "MUST name<n> SHOULD city<c>"),
    )
    .unwrap();
    let parser = engine.schema().query_parser();

    let (query, rows) = run(&engine, &profile, "n:O\"Brien||c:10:30").await;
    assert!(parser.parse_query(&query).is_ok(), "{}", query);
    assert_eq!(sorted_ids(&rows), vec!["q1"]);

    let (query, rows) = run(&engine, &profile, "n:a^b [c]").await;
    assert!(parser.parse_query(&query).is_ok(), "{}", query);
    assert_eq!(sorted_ids(&rows), vec!["q2"]);

    let exact = compile(&engine, &ProfileSettings::new("quoted", "MUST name<n> EXACT")).unwrap();
    let (query, rows) = run(&engine, &exact, "n:Tom O\"Brien").await;
    assert_eq!(query, "+name:(\"Tom O\\\"Brien\")");
    assert!(parser.parse_query(&query).is_ok(), "{}", query);
    assert_eq!(sorted_ids(&rows), vec!["q1"]);

    engine.close().await.unwrap();
}
