mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{app, blog_config, body_json, Event, RecordingDatabase};
use resourceful::sql::{PgBindValue, QueryBuf};
use resourceful::{AppError, Extensions, HookContext, HookFuture};
use serde_json::json;
use tower::ServiceExt;

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn insert_commits_before_responding() {
    let db = RecordingDatabase::new().rows(
        "INSERT INTO \"posts\"",
        vec![json!({"id": 1, "title": "hello", "secret": null, "user_id": null})],
    );
    let app = app(blog_config(), db.clone(), Extensions::new());

    let resp = app.oneshot(post_json("/api/v1/posts", json!({"title": "hello"}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["title"], "hello");

    assert_eq!(db.boundaries(), vec![Event::Begin, Event::Commit]);
    assert!(db.events().iter().all(|e| match e {
        Event::Query { in_transaction, .. } => *in_transaction,
        _ => true,
    }));
}

#[tokio::test]
async fn handler_failure_rolls_back_and_never_commits() {
    let db = RecordingDatabase::new()
        .fails("UPDATE \"posts\"", "disk full")
        .rows("FROM \"posts\"", vec![json!({"id": 1, "title": "old"})]);
    let app = app(blog_config(), db.clone(), Extensions::new());

    let req = Request::patch("/api/v1/posts/1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"title": "new"}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(db.boundaries(), vec![Event::Begin, Event::Rollback]);
    assert_eq!(db.queries().len(), 2);
}

#[tokio::test]
async fn validation_error_rolls_back() {
    let db = RecordingDatabase::new();
    let app = app(blog_config(), db.clone(), Extensions::new());

    let resp = app.oneshot(post_json("/api/v1/posts", json!({"secret": "x"}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["details"]["title"][0], "title is required");

    assert_eq!(db.boundaries(), vec![Event::Begin, Event::Rollback]);
    assert!(db.queries().is_empty());
}

#[tokio::test]
async fn entity_policy_overrides_version_policy() {
    let db = RecordingDatabase::new().rows("INSERT INTO \"comments\"", vec![json!({"id": 9, "post_id": 5, "body": "hi"})]);
    let app = app(blog_config(), db.clone(), Extensions::new());

    let resp = app
        .oneshot(post_json("/api/v1/posts/5/comments", json!({"body": "hi", "post_id": 999})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    assert!(db.boundaries().is_empty());
    let queries = db.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].1, vec![PgBindValue::Json(json!({"post_id": "5", "body": "hi"}))]);
}

#[tokio::test]
async fn reads_run_without_transaction() {
    let db = RecordingDatabase::new();
    let app = app(blog_config(), db.clone(), Extensions::new());

    let resp = app
        .oneshot(Request::get("/api/v1/posts/99").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "The item is not found on Post.");
    assert!(db.boundaries().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected_before_transaction() {
    let db = RecordingDatabase::new();
    let app = app(blog_config(), db.clone(), Extensions::new());

    let req = Request::post("/api/v1/posts")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(db.events().is_empty());
}

#[tokio::test]
async fn field_level_deny_is_a_client_error() {
    let db = RecordingDatabase::new();
    let app = app(blog_config(), db.clone(), Extensions::new());

    let q = "%7B%22secret%22%3A%22x%22%7D";
    let resp = app
        .clone()
        .oneshot(Request::get(format!("/api/v1/posts?q={}", q)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "unsupported_query_feature");
    assert_eq!(body["error"]["message"], "Unsupported query feature: where_equal [secret]");
    assert!(db.queries().is_empty());

    let q = "%7B%22title%22%3A%22x%22%7D";
    let resp = app
        .oneshot(Request::get(format!("/api/v1/posts?q={}", q)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn sorting_without_permission_is_denied() {
    let db = RecordingDatabase::new();
    let app = app(blog_config(), db, Extensions::new());

    let resp = app
        .oneshot(Request::get("/api/v1/posts?sort=-title").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["message"], "Unsupported query feature: sorting [title]");
}

#[tokio::test]
async fn delete_without_soft_delete_column_is_hard() {
    let db = RecordingDatabase::new().rows("DELETE FROM \"posts\"", vec![json!({"id": 3})]);
    let app = app(blog_config(), db.clone(), Extensions::new());

    let resp = app
        .oneshot(Request::delete("/api/v1/posts/3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(db.boundaries(), vec![Event::Begin, Event::Commit]);
}

fn guard(ctx: HookContext<'_>) -> HookFuture<'_> {
    Box::pin(async move {
        let HookContext { data, .. } = ctx;
        if data["title"] == "admin" {
            return Err(AppError::BadRequest("title is reserved".into()));
        }
        data["secret"] = json!("stamped");
        Ok(())
    })
}

fn audit(ctx: HookContext<'_>) -> HookFuture<'_> {
    Box::pin(async move {
        let HookContext { entity, db, data, .. } = ctx;
        let q = QueryBuf {
            sql: "INSERT INTO \"audit_log\" (\"entity\", \"row\") VALUES ($1, $2)".into(),
            params: vec![PgBindValue::Json(json!(entity)), PgBindValue::Json(data.clone())],
        };
        db.execute(&q).await?;
        Ok(())
    })
}

fn hooked() -> (serde_json::Value, Extensions) {
    let mut config = blog_config();
    config["versions"][0]["entities"][0]["hooks"] =
        json!([{"operations": "insert", "before": ["guard"], "after": ["audit"]}]);
    let extensions = Extensions::new().with_hook("guard", guard).with_hook("audit", audit);
    (config, extensions)
}

#[tokio::test]
async fn failing_before_hook_rolls_back() {
    let db = RecordingDatabase::new();
    let (config, extensions) = hooked();
    let app = app(config, db.clone(), extensions);

    let resp = app.oneshot(post_json("/api/v1/posts", json!({"title": "admin"}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["message"], "bad request: title is reserved");

    assert_eq!(db.boundaries(), vec![Event::Begin, Event::Rollback]);
    assert!(db.queries().is_empty());
}

#[tokio::test]
async fn hooks_share_the_request_transaction() {
    let db = RecordingDatabase::new().rows(
        "INSERT INTO \"posts\"",
        vec![json!({"id": 7, "title": "hello", "secret": "stamped", "user_id": null})],
    );
    let (config, extensions) = hooked();
    let app = app(config, db.clone(), extensions);

    let resp = app.oneshot(post_json("/api/v1/posts", json!({"title": "hello"}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let events = db.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], Event::Begin);
    match &events[1] {
        Event::Query { sql, params, in_transaction } => {
            assert!(sql.starts_with("INSERT INTO \"posts\""));
            assert!(format!("{:?}", params).contains("stamped"));
            assert!(*in_transaction);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &events[2] {
        Event::Query { sql, params, in_transaction } => {
            assert!(sql.starts_with("INSERT INTO \"audit_log\""));
            assert_eq!(params[0], PgBindValue::Json(json!("Post")));
            assert_eq!(
                params[1],
                PgBindValue::Json(json!({"id": 7, "title": "hello", "secret": "stamped", "user_id": null}))
            );
            assert!(*in_transaction);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(events[3], Event::Commit);
}
