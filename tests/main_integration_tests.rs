//! Integration tests for the service entry point.
//!
//! These tests verify startup behavior including:
//! - Configuration loading from the environment
//! - Engine construction from configuration (ephemeral and persisted)
//! - Serving the API on a real listener
//!
//! Note: Most tests use EPHEMERAL_INDEX=true so nothing is written to disk.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::time::timeout;

use visioncop::config::Config;
use visioncop::engine::VisionEngine;
use visioncop::features::EmbeddingModel;

/// Test helper to set environment variables for a test
struct TestEnv {
    vars_to_restore: Vec<(String, Option<String>)>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            vars_to_restore: Vec::new(),
        }
    }

    fn set_var(&mut self, key: &str, value: &str) {
        let old_value = std::env::var(key).ok();
        self.vars_to_restore.push((key.to_string(), old_value));
        std::env::set_var(key, value);
    }

    fn remove_var(&mut self, key: &str) {
        let old_value = std::env::var(key).ok();
        self.vars_to_restore.push((key.to_string(), old_value));
        std::env::remove_var(key);
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        for (key, old_value) in self.vars_to_restore.iter().rev() {
            match old_value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}

const ALL_VARS: [&str; 11] = [
    "DATA_DIR",
    "HTTP_PORT",
    "METRICS_PORT",
    "BIND_ADDRESS",
    "EPHEMERAL_INDEX",
    "EMBEDDING_MODEL",
    "SEARCH_TOP_K",
    "MAX_TOP_K",
    "MAX_UPLOAD_BYTES",
    "CORS_PERMISSIVE",
    "RUST_LOG",
];

fn clean_env() -> TestEnv {
    let mut env = TestEnv::new();
    for key in ALL_VARS {
        env.remove_var(key);
    }
    env
}

#[tokio::test]
#[serial]
async fn test_config_defaults_when_no_env_vars() {
    let _env = clean_env();

    let config = Config::from_env().expect("Config should load with defaults");

    assert_eq!(config.data_dir, std::path::PathBuf::from("data"));
    assert_eq!(config.http_port, 8000);
    assert_eq!(config.metrics_port, 9090);
    assert_eq!(config.bind_address, "auto");
    assert!(!config.ephemeral_index);
    assert_eq!(config.embedding_model, EmbeddingModel::ColorHistogram);
    assert_eq!(config.search_top_k, 5);
    assert_eq!(config.max_top_k, 50);
    assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
    assert!(config.cors_permissive);
    assert_eq!(config.log_level, "info");
}

#[tokio::test]
#[serial]
async fn test_config_loading_with_custom_values() {
    let mut env = clean_env();
    env.set_var("DATA_DIR", "/srv/visioncop");
    env.set_var("HTTP_PORT", "8181");
    env.set_var("METRICS_PORT", "9191");
    env.set_var("EPHEMERAL_INDEX", "TRUE");
    env.set_var("EMBEDDING_MODEL", "spatial-color");
    env.set_var("CORS_PERMISSIVE", "false");
    env.set_var("RUST_LOG", "debug");

    let config = Config::from_env().expect("Config should load");

    assert_eq!(config.http_port, 8181);
    assert_eq!(config.metrics_port, 9191);
    assert!(config.ephemeral_index);
    assert_eq!(config.embedding_model, EmbeddingModel::SpatialColor);
    assert!(!config.cors_permissive);
    assert_eq!(config.log_level, "debug");
    assert_eq!(
        config.images_dir(),
        std::path::PathBuf::from("/srv/visioncop/images")
    );
    assert_eq!(
        config.index_path(),
        std::path::PathBuf::from("/srv/visioncop/index/embeddings.json")
    );
}

#[tokio::test]
#[serial]
async fn test_invalid_port_configuration() {
    let mut env = clean_env();
    env.set_var("HTTP_PORT", "invalid_port");

    let config = Config::from_env().expect("Config should use default port on parse failure");

    assert_eq!(config.http_port, 8000);
}

#[tokio::test]
#[serial]
async fn test_unknown_embedding_model_is_error() {
    let mut env = clean_env();
    env.set_var("EMBEDDING_MODEL", "resnet50");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("EMBEDDING_MODEL"));
}

#[tokio::test]
#[serial]
async fn test_top_k_clamped_to_max() {
    let mut env = clean_env();
    env.set_var("SEARCH_TOP_K", "80");
    env.set_var("MAX_TOP_K", "20");

    let config = Config::from_env().expect("Config should load");

    assert_eq!(config.max_top_k, 20);
    assert_eq!(config.search_top_k, 20);
}

#[tokio::test]
#[serial]
async fn test_config_ipv6_bind_address() {
    let mut env = clean_env();
    env.set_var("BIND_ADDRESS", "::");

    let config = Config::from_env().expect("Config should load");

    assert_eq!(config.bind_address, "::");
}

#[tokio::test]
async fn test_socket_addr_parsing_ipv6_localhost() {
    let addr: std::net::SocketAddr = "[::1]:8000".parse().expect("Should parse IPv6 localhost");
    assert!(addr.is_ipv6());
    assert_eq!(addr.port(), 8000);
}

#[tokio::test]
#[serial]
async fn test_ephemeral_engine_writes_no_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = clean_env();
    env.set_var("DATA_DIR", dir.path().to_str().unwrap());
    env.set_var("EPHEMERAL_INDEX", "1");

    let config = Config::from_env().expect("Config should load");
    let engine = VisionEngine::from_config(&config)
        .await
        .expect("Engine should build");

    let indexed = visioncop::seed::generate_samples(&engine).await.unwrap();
    assert_eq!(indexed, 10);

    assert!(config.images_dir().join("nature_0.jpg").exists());
    assert!(!config.index_path().exists());

    let status = engine.status().await;
    assert_eq!(status.index, "memory://");
    assert_eq!(status.model, "color-histogram");
}

#[tokio::test]
#[serial]
async fn test_corrupt_snapshot_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = clean_env();
    env.set_var("DATA_DIR", dir.path().to_str().unwrap());

    let config = Config::from_env().expect("Config should load");
    std::fs::create_dir_all(config.index_path().parent().unwrap()).unwrap();
    std::fs::write(config.index_path(), b"{ not json").unwrap();

    let result = VisionEngine::from_config(&config).await;
    assert!(matches!(
        result,
        Err(visioncop::error::ServiceError::IndexLoad(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_server_serves_health_on_real_listener() {
    use http_body_util::{BodyExt, Empty};
    use hyper::body::Bytes;
    use visioncop::http::{router, RouterOptions};

    let dir = tempfile::tempdir().unwrap();
    let mut env = clean_env();
    env.set_var("DATA_DIR", dir.path().to_str().unwrap());
    env.set_var("EPHEMERAL_INDEX", "true");

    let config = Config::from_env().expect("Config should load");
    let engine = Arc::new(VisionEngine::from_config(&config).await.unwrap());
    let app = router(engine, &RouterOptions::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client: hyper_util::client::legacy::Client<_, Empty<Bytes>> =
        hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
            .build_http();
    let uri: hyper::Uri = format!("http://127.0.0.1:{}/health", port).parse().unwrap();

    let response = timeout(Duration::from_secs(5), client.get(uri))
        .await
        .expect("health request timed out")
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "serving");

    server.abort();
}
