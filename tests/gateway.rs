//! End-to-end behaviour of the gateway against a mock upstream.

use movies_gateway::data_source::DataSourceConfig;
use movies_gateway::{Gateway, GatewayBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn posts(count: u64) -> Value {
    Value::Array(
        (1..=count)
            .map(|id| {
                json!({
                    "userId": (id % 3) + 1,
                    "id": id,
                    "title": format!("post {}", id),
                    "body": format!("body of post {}", id),
                })
            })
            .collect(),
    )
}

fn builder_for(upstream: &str) -> GatewayBuilder {
    Gateway::builder().upstream(DataSourceConfig::new(upstream).no_retry())
}

async fn run(gateway: &Gateway, query: &str) -> Value {
    let response = gateway.execute(async_graphql::Request::new(query)).await;
    serde_json::to_value(&response).unwrap()
}

#[tokio::test]
async fn user_by_id() {
    let gateway = builder_for("http://127.0.0.1:9").build().unwrap();

    assert_eq!(
        run(&gateway, "{ user(id: 2) { name } }").await,
        json!({"data": {"user": {"name": "Paul Auster"}}})
    );
    assert_eq!(
        run(&gateway, "{ user(id: 1) { id name } }").await,
        json!({"data": {"user": {"id": "1", "name": "Kate Chopin"}}})
    );
}

#[tokio::test]
async fn unknown_user_is_null_without_errors() {
    let gateway = builder_for("http://127.0.0.1:9").build().unwrap();
    let body = run(&gateway, "{ user(id: 99) { name } }").await;
    assert_eq!(body, json!({"data": {"user": null}}));
}

#[tokio::test]
async fn string_and_integer_ids_match() {
    let gateway = builder_for("http://127.0.0.1:9").build().unwrap();
    let as_string = run(&gateway, r#"{ user(id: "1") { name } }"#).await;
    let as_int = run(&gateway, "{ user(id: 1) { name } }").await;
    assert_eq!(as_string, as_int);

    let padded = run(&gateway, r#"{ user(id: "01") { name } }"#).await;
    assert_eq!(padded, json!({"data": {"user": null}}));
}

#[tokio::test]
async fn variables_are_supported() {
    let gateway = builder_for("http://127.0.0.1:9").build().unwrap();
    let request = async_graphql::Request::new("query Find($id: ID!) { user(id: $id) { name } }")
        .variables(async_graphql::Variables::from_json(json!({"id": "2"})));
    let body = serde_json::to_value(gateway.execute(request).await).unwrap();
    assert_eq!(body["data"]["user"]["name"], "Paul Auster");
}

#[tokio::test]
async fn movie_lists_upstream_posts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts(5)))
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let body = run(&gateway, "{ movie { userId id title body } }").await;

    assert!(body.get("errors").is_none());
    let movies = body["data"]["movie"].as_array().unwrap();
    assert_eq!(movies.len(), 5);
    assert_eq!(
        movies[2],
        json!({"userId": "1", "id": "3", "title": "post 3", "body": "body of post 3"})
    );
}

#[tokio::test]
async fn data_follows_query_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts(1)))
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let response = gateway
        .execute(async_graphql::Request::new(
            "{ movie { title } user(id: 1) { name } }",
        ))
        .await;
    let text = serde_json::to_string(&response).unwrap();
    assert!(text.find("\"movie\"").unwrap() < text.find("\"user\"").unwrap());

    let response = gateway
        .execute(async_graphql::Request::new(
            "{ user(id: 1) { name id } movie { title } }",
        ))
        .await;
    let text = serde_json::to_string(&response.data).unwrap();
    assert_eq!(
        text,
        r#"{"user":{"name":"Kate Chopin","id":"1"},"movie":[{"title":"post 1"}]}"#
    );
}

#[tokio::test]
async fn upstream_error_nulls_only_movie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let body = run(&gateway, "{ movie { id } user(id: 1) { name } }").await;

    assert_eq!(body["data"].get("movie"), Some(&Value::Null));
    assert_eq!(body["data"]["user"]["name"], "Kate Chopin");

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["movie"]));
    assert_eq!(errors[0]["extensions"]["code"], "UPSTREAM_HTTP_ERROR");
    assert_eq!(errors[0]["extensions"]["status"], 500);
}

#[tokio::test]
async fn unreachable_upstream_nulls_only_movie() {
    // Nothing listens on the discard port.
    let gateway = builder_for("http://127.0.0.1:9").build().unwrap();
    let body = run(&gateway, "{ movie { id } user(id: 2) { name } }").await;

    assert_eq!(body["data"].get("movie"), Some(&Value::Null));
    assert_eq!(body["data"]["user"]["name"], "Paul Auster");

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["movie"]));
    assert_eq!(errors[0]["extensions"]["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn movie_is_cached_across_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts(3)))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let first = run(&gateway, "{ movie { id title } }").await;
    let second = run(&gateway, "{ movie { id title } }").await;

    assert_eq!(first, second);
    assert_eq!(gateway.contexts().cache_stats().size, 1);
    server.verify().await;
}

#[tokio::test]
async fn no_store_responses_are_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Cache-Control", "no-store")
                .set_body_json(posts(2)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    run(&gateway, "{ movie { id } }").await;
    run(&gateway, "{ movie { id } }").await;
    server.verify().await;
}

#[tokio::test]
async fn unknown_field_rejects_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts(1)))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let body = run(&gateway, "{ movie { id rating } }").await;

    assert_eq!(body["data"], Value::Null);
    assert!(!body["errors"].as_array().unwrap().is_empty());
    server.verify().await;
}

#[tokio::test]
async fn post_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userId": 2, "id": 4, "title": "four", "body": "iv"
        })))
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let body = run(&gateway, "{ post(id: 4) { id title } }").await;
    assert_eq!(body, json!({"data": {"post": {"id": "4", "title": "four"}}}));
}

#[tokio::test]
async fn missing_post_reports_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/999"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let body = run(&gateway, r#"{ post(id: "999") { id } }"#).await;

    assert_eq!(body["data"].get("post"), Some(&Value::Null));
    assert_eq!(body["errors"][0]["path"], json!(["post"]));
    assert_eq!(body["errors"][0]["extensions"]["code"], "UPSTREAM_NOT_FOUND");
}

#[tokio::test]
async fn malformed_upstream_item_nulls_that_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"userId": 1, "id": 1, "title": "ok"},
            {"userId": 1, "id": null, "title": "broken"}
        ])))
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let body = run(&gateway, "{ movie { id title } }").await;

    assert_eq!(
        body["data"]["movie"],
        json!([{"id": "1", "title": "ok"}, null])
    );
    assert_eq!(body["data"]["movie"].get(1), Some(&Value::Null));
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["path"], json!(["movie", 1, "id"]));
    assert_eq!(body["errors"][0]["extensions"]["code"], "SCHEMA_COERCION_ERROR");
}

#[tokio::test]
async fn bearer_token_is_sent_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts(1)))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri())
        .bearer_token("s3cret")
        .build()
        .unwrap();
    let body = run(&gateway, "{ movie { id } }").await;
    assert_eq!(body["data"]["movie"], json!([{"id": "1"}]));
    server.verify().await;
}

#[tokio::test]
async fn undecodable_posts_are_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"userId": 1, "id": 1, "title": 42}])),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts(1)))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();

    let first = run(&gateway, "{ movie { title } }").await;
    assert_eq!(first["data"].get("movie"), Some(&Value::Null));
    assert_eq!(first["errors"][0]["extensions"]["code"], "UPSTREAM_DECODE_ERROR");
    assert_eq!(gateway.contexts().cache_stats().size, 0);

    let second = run(&gateway, "{ movie { title } }").await;
    let third = run(&gateway, "{ movie { title } }").await;
    assert_eq!(second, json!({"data": {"movie": [{"title": "post 1"}]}}));
    assert_eq!(second, third);
    assert_eq!(gateway.contexts().cache_stats().size, 1);
    server.verify().await;
}

#[tokio::test]
async fn concurrent_requests_share_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(posts(2))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1..=2)
        .mount(&server)
        .await;

    let gateway = builder_for(&server.uri()).build().unwrap();
    let (a, b) = tokio::join!(
        run(&gateway, "{ movie { id } user(id: 1) { name } }"),
        run(&gateway, "{ user(id: 2) { name } movie { id title } }"),
    );

    assert!(a.get("errors").is_none());
    assert!(b.get("errors").is_none());
    assert_eq!(a["data"]["movie"], json!([{"id": "1"}, {"id": "2"}]));
    assert_eq!(b["data"]["user"]["name"], "Paul Auster");
    assert_eq!(b["data"]["movie"][1]["title"], "post 2");
    assert_eq!(gateway.contexts().cache_stats().size, 1);

    let c = run(&gateway, "{ movie { id } }").await;
    assert_eq!(c["data"]["movie"], a["data"]["movie"]);
    server.verify().await;
}
