use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> EmbeddingConfig {
    let url = Url::parse(&server.uri()).expect("mock server URI parses");
    EmbeddingConfig {
        host: url.host_str().expect("mock host").to_string(),
        port: url.port().expect("mock port"),
        batch_size: 2,
        ..EmbeddingConfig::default()
    }
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        host: "embed-host".to_string(),
        port: 4242,
        model: "test-model".to_string(),
        ..EmbeddingConfig::default()
    };
    let client = EmbeddingClient::new(&config).expect("client builds");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.base_url.host_str(), Some("embed-host"));
    assert_eq!(client.base_url.port(), Some(4242));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);

    let client = client.with_retry_attempts(5);
    assert_eq!(client.retry_attempts, 5);
}

#[tokio::test]
async fn embeds_in_configured_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&config_for(&server)).expect("client builds");
    let texts: Vec<String> = (0..4).map(|i| format!("text {}", i)).collect();
    let embeddings = client.embed_batch(&texts).await.expect("embedding succeeds");

    assert_eq!(embeddings.len(), 4);
    assert_eq!(embeddings[0], vec![0.1, 0.2]);
}

#[tokio::test]
async fn empty_input_makes_no_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&config_for(&server)).expect("client builds");
    let embeddings = client.embed_batch(&[]).await.expect("empty batch is fine");
    assert!(embeddings.is_empty());
}

#[tokio::test]
async fn sends_configured_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "nomic-embed-text:latest"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&config_for(&server)).expect("client builds");
    let result = client.embed_batch(&["hello".to_string()]).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&config_for(&server)).expect("client builds");
    let result = client.embed_batch(&["hello".to_string()]).await;
    assert!(matches!(result, Err(LecternError::Upstream(_))));
}

#[tokio::test]
async fn server_error_is_retried_then_surfaces() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&config_for(&server))
        .expect("client builds")
        .with_retry_attempts(2);
    let result = client.embed_batch(&["hello".to_string()]).await;
    assert!(matches!(result, Err(LecternError::Upstream(_))));
}

#[tokio::test]
async fn count_mismatch_is_an_upstream_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1]]
        })))
        .mount(&server)
        .await;

    let client = EmbeddingClient::new(&config_for(&server)).expect("client builds");
    let result = client
        .embed_batch(&["one".to_string(), "two".to_string()])
        .await;
    assert!(matches!(result, Err(LecternError::Upstream(_))));
}
