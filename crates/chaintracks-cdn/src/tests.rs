//! Tests for the CDN and header-service clients.

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chaintracks_bulk::ChunkSource;
use chaintracks_core::{genesis_hash, genesis_header, Chain, HeightRange};

use crate::client::CdnClient;
use crate::error::CdnError;
use crate::header_service::HeaderServiceClient;
use crate::types::{CdnConfig, HeaderServiceConfig};

fn cdn_config(base_url: &str) -> CdnConfig {
    CdnConfig {
        base_url: base_url.to_string(),
        manifest_path: "blockHeaders.json".to_string(),
        retries: 3,
        backoff_ms: 1,
    }
}

fn service_config(base_url: &str) -> HeaderServiceConfig {
    HeaderServiceConfig {
        base_url: base_url.to_string(),
        retries: 3,
        backoff_ms: 1,
        page_size: 2,
    }
}

#[tokio::test]
async fn manifest_fetch_resolves_source_urls() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/blockHeaders.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "rootFolder": "headers",
            "jsonFilename": "blockHeaders.json",
            "headersPerFile": 100_000,
            "files": [{
                "chain": "main",
                "fileName": "mainNet_0.headers",
                "firstHeight": 0,
                "count": 100_000,
                "prevHash": "0000000000000000000000000000000000000000000000000000000000000000",
                "lastHash": "000000000002d01c1fccc21636b607dfd930d31d01c3a62104612a1719011250",
                "prevChainWork": "0000000000000000000000000000000000000000000000000000000000000000",
                "lastChainWork": "000000000000000000000000000000000000000000000000064492eaf00f2520",
                "fileHash": "9ec6556a2c16a6daabe7bcb76f1482dd59b911f5e0d0b196b85ba9076fbbbf3e"
            }]
        })))
        .mount(&server)
        .await;

    let client = CdnClient::new(cdn_config(&server.uri()));
    let manifest = client.fetch_manifest().await.unwrap();

    assert_eq!(manifest.headers_per_file, 100_000);
    assert_eq!(manifest.files.len(), 1);
    let file = &manifest.files[0];
    assert_eq!(file.chain, Chain::Main);
    assert_eq!(file.count, 100_000);
    assert!(file.prev_hash.is_zero());
    assert_eq!(
        file.source_url.as_deref(),
        Some(format!("{}/headers/mainNet_0.headers", server.uri()).as_str())
    );
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/headers/mainNet_0.headers"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/headers/mainNet_0.headers"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 160]))
        .mount(&server)
        .await;

    let client = CdnClient::new(cdn_config(&server.uri()));
    let bytes = client
        .fetch_chunk("headers/mainNet_0.headers")
        .await
        .unwrap();
    assert_eq!(bytes, vec![7u8; 160]);
}

#[tokio::test]
async fn retries_are_bounded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/headers/mainNet_0.headers"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = CdnClient::new(cdn_config(&server.uri()));
    let err = client.fetch_file("headers/mainNet_0.headers").await;
    assert!(matches!(err, Err(CdnError::Status { status: 503, .. })));
}

#[tokio::test]
async fn missing_resources_never_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/headers/gone.headers"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdnClient::new(cdn_config(&server.uri()));
    let err = client.fetch_file("headers/gone.headers").await;
    assert!(matches!(err, Err(CdnError::NotFound(_))));
}

#[tokio::test]
async fn header_service_reports_present_height() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/height"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "height": 850_000
        })))
        .mount(&server)
        .await;

    let client = HeaderServiceClient::new(service_config(&server.uri()));
    assert_eq!(client.present_height().await.unwrap(), 850_000);
}

#[tokio::test]
async fn header_service_pages_and_parses_headers() {
    let server = MockServer::start().await;
    let genesis_hex = hex::encode(genesis_header(Chain::Main).serialize());

    // Page size is 2; the service returns one header per page and the
    // client walks forward until the range is covered.
    Mock::given(method("GET"))
        .and(path("/headers"))
        .and(query_param("height", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "height": 0, "hex": genesis_hex }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/headers"))
        .and(query_param("height", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let client = HeaderServiceClient::new(service_config(&server.uri()));
    let headers = client
        .fetch_headers(HeightRange::new(0, 2))
        .await
        .unwrap();

    // The service ran dry after genesis.
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].height, 0);
    assert_eq!(headers[0].hash, genesis_hash(Chain::Main));
}

#[tokio::test]
async fn malformed_header_hex_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/headers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "height": 0, "hex": "deadbeef" }
        ])))
        .mount(&server)
        .await;

    let client = HeaderServiceClient::new(service_config(&server.uri()));
    let err = client.fetch_headers(HeightRange::new(0, 0)).await;
    assert!(matches!(err, Err(CdnError::Core(_))));
}
