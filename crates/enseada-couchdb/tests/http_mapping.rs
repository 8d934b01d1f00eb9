//! HTTP mapping of the CouchDB backend against a mock server.

use enseada_couchdb::{CouchConfig, CouchDocumentStore};
use enseada_storage::{ChangesSince, DocumentStore, FindQuery, StorageError};
use futures_util::StreamExt;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> CouchDocumentStore {
    let config = CouchConfig {
        url: server.uri(),
        username: "admin".into(),
        password: Some("secret".into()),
        ..Default::default()
    };
    CouchDocumentStore::new(&config).unwrap()
}

#[tokio::test]
async fn create_database_reports_existing() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/users"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/acl"))
        .respond_with(ResponseTemplate::new(412).set_body_json(json!({
            "error": "file_exists",
            "reason": "The database could not be created, the file already exists.",
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(store.create_database("users").await.unwrap());
    assert!(!store.create_database("acl").await.unwrap());
}

#[tokio::test]
async fn not_found_and_conflict_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/user-ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "not_found",
            "reason": "missing",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodb/x"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "not_found",
            "reason": "Database does not exist.",
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/user-alice"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "conflict",
            "reason": "Document update conflict.",
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(assert_err!(store.get("users", "user-ghost").await).is_not_found());
    assert!(matches!(
        store.get("nodb", "x").await.unwrap_err(),
        StorageError::DatabaseNotFound { .. }
    ));
    let err = store
        .put("users", "user-alice", json!({ "_rev": "1-old" }))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn get_meta_reads_etag() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/users/user-alice"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"2-abc\""))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(store.get_meta("users", "user-alice").await.unwrap(), "2-abc");
    assert!(store.get_meta("users", "user-bob").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn create_find_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ok": true, "id": "generated", "rev": "1-a",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/_find"))
        .and(body_partial_json(json!({ "selector": { "kind": "pkce_request", "sig": "sig-1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [{ "_id": "generated", "_rev": "1-a", "sig": "sig-1" }],
            "warning": "No matching index found, create an index to optimize query time.",
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/oauth/generated"))
        .and(query_param("rev", "1-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true, "id": "generated", "rev": "2-b",
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let meta = assert_ok!(store.create_doc("oauth", json!({ "kind": "pkce_request" })).await);
    assert_eq!(meta.id, "generated");

    let query = FindQuery::new(json!({ "kind": "pkce_request", "sig": "sig-1" })).limit(2);
    let docs = store.find("oauth", &query).await.unwrap();
    assert_eq!(docs.len(), 1);

    assert_eq!(store.delete("oauth", "generated", "1-a").await.unwrap(), "2-b");
}

#[tokio::test]
async fn change_feed_pages_then_ends_on_error() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/acl"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acl/_changes"))
        .and(query_param("feed", "longpoll"))
        .and(query_param("since", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "seq": "1-g1", "id": "p-1", "changes": [{ "rev": "1-x" }] },
                { "seq": "2-g2", "id": "p-2", "changes": [{ "rev": "2-y" }], "deleted": true },
            ],
            "last_seq": "2-g2",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acl/_changes"))
        .and(query_param("since", "2-g2"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "unavailable", "reason": "maintenance",
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let mut feed = store.changes("acl", ChangesSince::Beginning).await.unwrap();

    let first = feed.next().await.unwrap().unwrap();
    assert_eq!((first.id.as_str(), first.rev.as_str()), ("p-1", "1-x"));
    let second = feed.next().await.unwrap().unwrap();
    assert!(second.deleted);
    assert_eq!(second.seq, "2-g2");

    let err = feed.next().await.unwrap().unwrap_err();
    assert!(err.is_transient());
    assert!(feed.next().await.is_none());
}

#[tokio::test]
async fn change_feed_on_missing_database() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/acl"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let result = store.changes("acl", ChangesSince::Now).await;
    assert!(matches!(result, Err(StorageError::DatabaseNotFound { .. })));
}
