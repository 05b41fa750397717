mod common;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use common::{KB, engine, open_checkpoints, payload, test_config};
use s3trans::{
    errors::StorageError,
    services::{orchestrator::Endpoint, retry::RetryPolicy},
    storage::http::HttpSource,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

#[derive(Clone)]
struct AppState {
    content: Arc<Vec<u8>>,
    ranged_gets: Arc<AtomicUsize>,
}

async fn handle_ranged(headers: HeaderMap, State(state): State<AppState>) -> Response {
    let total = state.content.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, total));

    match range {
        Some((start, end)) => {
            state.ranged_gets.fetch_add(1, Ordering::SeqCst);
            let mut response_headers = HeaderMap::new();
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, total)).unwrap(),
            );
            (
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                Bytes::copy_from_slice(&state.content[start..=end]),
            )
                .into_response()
        }
        None => (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response(),
    }
}

async fn handle_empty() -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, "bytes */0")],
    )
        .into_response()
}

async fn handle_plain(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response()
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start, end) = value.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    (start <= end && end < total).then_some((start, end))
}

async fn serve(content: Vec<u8>) -> (String, AppState) {
    let state = AppState {
        content: Arc::new(content),
        ranged_gets: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/isos/disk.iso", get(handle_ranged))
        .route("/plain.bin", get(handle_plain))
        .route("/empty.bin", get(handle_empty))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn source() -> HttpSource {
    HttpSource::new(Duration::from_secs(5), RetryPolicy::none()).unwrap()
}

#[tokio::test]
async fn discovers_size_and_reads_ranges() {
    let content = payload(3000).to_vec();
    let (base, _) = serve(content.clone()).await;
    let url = format!("{}/isos/disk.iso", base);

    let http = source();
    assert_eq!(http.content_length(&url).await.unwrap(), 3000);
    assert_eq!(&http.get_range(&url, 100, 199).await.unwrap()[..], &content[100..200]);
}

#[tokio::test]
async fn server_without_range_support_is_rejected() {
    let (base, _) = serve(payload(10).to_vec()).await;
    let err = source()
        .content_length(&format!("{}/plain.bin", base))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Http { status: 200, .. }));
}

#[tokio::test]
async fn downloads_urls_in_parts() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let content = payload(6 * KB + 11).to_vec();
    let (base, state) = serve(content.clone()).await;

    let checkpoints = open_checkpoints(&dir).await;
    let summary = engine(test_config(), &checkpoints)
        .run(
            Endpoint::Http {
                source: source(),
                urls: vec![format!("{}/isos/disk.iso", base)],
            },
            Endpoint::Local { root: out.clone() },
        )
        .await
        .unwrap();

    assert_eq!(summary.objects, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.parts, 7);
    assert_eq!(tokio::fs::read(out.join("disk.iso")).await.unwrap(), content);
    // one size request plus one GET per part
    assert_eq!(state.ranged_gets.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn small_urls_download_in_one_request() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let content = payload(500).to_vec();
    let (base, _) = serve(content.clone()).await;

    let checkpoints = open_checkpoints(&dir).await;
    let summary = engine(test_config(), &checkpoints)
        .run(
            Endpoint::Http {
                source: source(),
                urls: vec![format!("{}/isos/disk.iso", base)],
            },
            Endpoint::Local { root: out.clone() },
        )
        .await
        .unwrap();

    assert_eq!(summary.objects, 1);
    assert_eq!(summary.parts, 0);
    assert_eq!(tokio::fs::read(out.join("disk.iso")).await.unwrap(), content);
}

#[tokio::test]
async fn empty_resources_download_as_empty_files() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let (base, _) = serve(payload(10).to_vec()).await;
    let url = format!("{}/empty.bin", base);

    assert_eq!(source().content_length(&url).await.unwrap(), 0);

    let checkpoints = open_checkpoints(&dir).await;
    let summary = engine(test_config(), &checkpoints)
        .run(
            Endpoint::Http {
                source: source(),
                urls: vec![url],
            },
            Endpoint::Local { root: out.clone() },
        )
        .await
        .unwrap();

    assert_eq!(summary.objects, 1);
    assert_eq!(summary.failed, 0);
    assert!(tokio::fs::read(out.join("empty.bin")).await.unwrap().is_empty());
}
