use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use modelrest::schema::{ColumnConfig, EntityConfig, ScalarKind};
use modelrest::{router, AppState, AuthRequest, Authorizer, MemoryDatabase, Registry, SchemaConfig, Settings};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn registry() -> Arc<Registry> {
    let mut item = EntityConfig::new("item")
        .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
        .column(ColumnConfig::new("name", ScalarKind::String).not_null());
    item.key = Some("items".into());
    let mut tag = EntityConfig::new("tag")
        .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
        .column(ColumnConfig::new("label", ScalarKind::String));
    tag.key = Some("tags".into());
    tag.operations = vec!["get".into(), "post".into()];
    Arc::new(
        Registry::from_config(SchemaConfig {
            entities: vec![item, tag],
            join_tables: vec![],
        })
        .unwrap(),
    )
}

fn state() -> AppState {
    let registry = registry();
    let db = MemoryDatabase::new(&registry);
    AppState::new(registry, Arc::new(db))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>, auth: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn crud_round_trip() {
    let app = router(state());

    let (status, body) = send(&app, Method::POST, "/items", Some(json!({"id": 1, "name": "a"})), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"], json!({"id": 1, "name": "a"}));

    let (status, body) = send(&app, Method::GET, "/items/1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"id": 1, "name": "a"}));

    let (status, _) = send(&app, Method::GET, "/items/2", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::PUT, "/items/2", Some(json!({"name": "b"})), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"], json!({"id": 2, "name": "b"}));

    let (status, body) = send(&app, Method::PUT, "/items/2", Some(json!({"name": "c"})), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "c");

    let (status, body) = send(&app, Method::PATCH, "/items", Some(json!([{"id": 1, "name": "z"}])), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["name"], "z");

    let (status, body) = send(&app, Method::GET, "/items?ids=2,1,7", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{"id": 2, "name": "c"}, {"id": 1, "name": "z"}]));

    let (status, body) = send(&app, Method::GET, "/items?limit=1&offset=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{"id": 2, "name": "c"}]));

    let (status, _) = send(&app, Method::DELETE, "/items/1", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::GET, "/items/1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::DELETE, "/items/1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::DELETE, "/items", Some(json!([2, 3])), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{"id": 2}]));
}

#[tokio::test]
async fn rejected_payloads() {
    let app = router(state());

    let (status, body) = send(&app, Method::PUT, "/items/3", Some(json!({"id": 4, "name": "c"})), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["details"]["input"], json!({"id": 4, "name": "c"}));

    let (status, body) = send(&app, Method::POST, "/items", Some(json!({"id": 5})), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, _) = send(&app, Method::PATCH, "/items/9", Some(json!({"name": "d"})), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/items/abc", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/widgets", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_listings_are_not_found() {
    let app = router(state());
    let (status, _) = send(&app, Method::GET, "/items", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, Method::POST, "/items", Some(json!({"id": 1, "name": "a"})), None).await;
    let (status, _) = send(&app, Method::GET, "/items?ids=99", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, "/items?offset=5", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(&app, Method::GET, "/items?ids=99,1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{"id": 1, "name": "a"}]));
}

#[tokio::test]
async fn uri_updates_can_change_the_key() {
    let app = router(state());
    send(&app, Method::POST, "/items", Some(json!({"id": 1, "name": "a"})), None).await;

    let (status, body) = send(&app, Method::PATCH, "/items/1", Some(json!({"id": 2})), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"id": 2, "name": "a"}));
    let (status, _) = send(&app, Method::GET, "/items/1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::PUT, "/items/2", Some(json!({"id": 3, "name": "b"})), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"id": 3, "name": "b"}));
    let (status, body) = send(&app, Method::GET, "/items/3", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "b");
}

#[tokio::test]
async fn entity_responses_link_their_schema() {
    let settings = Settings {
        api_prefix: "/api".into(),
        ..Settings::default()
    };
    let app = router(state().with_settings(settings));
    let request = |method: Method, uri: &str, body: Body| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/api/items", Body::from(r#"{"id": 1, "name": "a"}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LINK], "</api/items/_schema>; rel=\"schema\"");

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/items/9", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[header::LINK], "</api/items/_schema>; rel=\"schema\"");

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/widgets", Body::empty()))
        .await
        .unwrap();
    assert!(response.headers().get(header::LINK).is_none());
    let response = app.clone().oneshot(request(Method::GET, "/health", Body::empty())).await.unwrap();
    assert!(response.headers().get(header::LINK).is_none());
}

#[tokio::test]
async fn verbs_outside_operations_are_not_allowed() {
    let app = router(state());
    let (status, _) = send(&app, Method::POST, "/tags", Some(json!({"id": 1, "label": "x"})), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(Request::builder().method(Method::DELETE).uri("/tags/1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST");
}

#[tokio::test]
async fn schema_document_is_served() {
    let app = router(state());
    let (status, body) = send(&app, Method::GET, "/items/_schema", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["openapi"].is_string());
    assert!(body["paths"]["/items"]["post"].is_object());
    assert!(body["components"]["schemas"]["item"].is_object());
}

#[tokio::test]
async fn prefix_and_body_limit_come_from_settings() {
    let settings = Settings {
        api_prefix: "/api".into(),
        body_limit: 32,
        ..Settings::default()
    };
    let app = router(state().with_settings(settings));

    let (status, _) = send(&app, Method::POST, "/api/items", Some(json!({"id": 1, "name": "a"})), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, Method::GET, "/api/items", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let big = json!({"id": 1, "name": "x".repeat(64)});
    let (status, _) = send(&app, Method::POST, "/api/items", Some(big), None).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

struct Tokens;

#[async_trait]
impl Authorizer for Tokens {
    async fn authorize(&self, credentials: &str, request: &AuthRequest<'_>) -> Option<bool> {
        assert!(request.route.starts_with("/:key"));
        match credentials {
            "good" => Some(true),
            "stale" => Some(false),
            _ => None,
        }
    }
}

#[tokio::test]
async fn authorizer_guards_entity_routes() {
    let app = router(state().with_authorizer(Arc::new(Tokens)));
    let (status, _) = send(&app, Method::POST, "/items", Some(json!({"id": 1, "name": "a"})), Some("Basic good")).await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/items").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"modelrest\"");

    let (status, _) = send(&app, Method::GET, "/items", None, Some("Basic bad")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, Method::GET, "/items", None, Some("Basic stale")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, Method::GET, "/items", None, Some("Basic good")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
