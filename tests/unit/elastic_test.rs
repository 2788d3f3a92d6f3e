use dbrelay::connector::elastic::search_request;
use serde_json::json;

// --- raw-query statement resolution ---

#[test]
fn string_statements_are_parsed_into_the_search_body() {
    let statement = json!(r#"{"query": {"match": {"who": "a"}}, "size": 2}"#);
    let (path, body) = search_request(&statement).expect("parse statement");

    assert_eq!(path, "/_all/_search");
    assert_eq!(body["query"]["match"]["who"], json!("a"));
    assert_eq!(body["size"], json!(2));
}

#[test]
fn malformed_string_statements_are_rejected() {
    let err = search_request(&json!("SELECT * FROM events")).expect_err("not json");
    assert!(err.to_string().contains("invalid search statement"));
}

#[test]
fn non_object_statements_are_rejected() {
    let err = search_request(&json!(42)).expect_err("not an object");
    assert!(err.to_string().contains("must be a JSON object"));
}

#[test]
fn addressed_messages_build_the_index_type_path() {
    let message = json!({
        "index": "events",
        "type": "log",
        "body": { "query": { "match_all": {} } },
    });
    let (path, body) = search_request(&message).expect("addressed message");

    assert_eq!(path, "/events/log/_search");
    assert_eq!(body, json!({ "query": { "match_all": {} } }));
}

#[test]
fn addressed_messages_default_index_and_body() {
    let (path, body) = search_request(&json!({ "type": "log" })).expect("typed message");

    assert_eq!(path, "/_all/log/_search");
    assert_eq!(body, json!({}));
}

#[test]
fn bare_object_statements_are_used_verbatim_as_the_body() {
    let statement = json!({ "query": { "term": { "n": 1 } } });
    let (path, body) = search_request(&statement).expect("bare body");

    assert_eq!(path, "/_all/_search");
    assert_eq!(body, statement);
}
