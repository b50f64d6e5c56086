//! HTTP surface: injection, metrics, and a passthrough to the node for
//! everything else.

use std::{future::Future, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use flashbake_relay::bundles::BundleRelay;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::*;

/// Largest request body forwarded to the node.
const MAX_PROXY_BODY: usize = 16 * 1024 * 1024;

/// Headers that only concern a single connection and are not forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone)]
pub struct AppState {
    relay: Arc<BundleRelay>,
    proxy: reqwest::Client,
    rpc_url: String,
}

impl AppState {
    pub fn new(relay: Arc<BundleRelay>, rpc_url: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            relay,
            proxy: reqwest::Client::builder().build()?,
            rpc_url: rpc_url.trim_end_matches('/').to_owned(),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/injection/operation", post(inject))
        .route("/inject", post(inject))
        .route("/metrics", get(metrics))
        .fallback(proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Either the bare hex string octez-client posts, or a wrapped form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InjectBody {
    Raw(String),
    Wrapped {
        #[serde(rename = "rawTransactionHex")]
        raw_transaction_hex: String,
    },
}

impl InjectBody {
    fn into_raw(self) -> String {
        match self {
            Self::Raw(raw) => raw,
            Self::Wrapped {
                raw_transaction_hex,
            } => raw_transaction_hex,
        }
    }
}

fn error_response(reason: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": reason.to_string() })),
    )
        .into_response()
}

async fn inject(State(state): State<AppState>, body: Bytes) -> Response {
    let raw = match serde_json::from_slice::<InjectBody>(&body) {
        Ok(b) => b.into_raw(),
        Err(e) => return error_response(format!("malformed injection body: {e}")),
    };

    match state.relay.inject(raw).await {
        Ok(hash) => (StatusCode::OK, Json(hash)).into_response(),
        Err(e) => {
            warn!(err = %e, "rejected injection");
            error_response(e)
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.relay.metrics().encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for h in &HOP_BY_HOP {
        out.remove(h);
    }
    out.remove("keep-alive");
    out
}

async fn proxy(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.rpc_url, path);

    let mut headers = forwardable(&parts.headers);
    headers.remove(header::HOST);

    let body = match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
        Ok(b) => b,
        Err(e) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };

    trace!(method = %parts.method, %url, "proxying to node");
    let upstream = state
        .proxy
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let resp = match upstream {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, err = %e, "node unreachable");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("node unreachable: {e}") })),
            )
                .into_response();
        }
    };

    let status = resp.status();
    let headers = forwardable(resp.headers());
    let body = Body::from_stream(resp.bytes_stream().map_err(std::io::Error::other));

    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flashbake_relay::{
        metrics::RelayMetrics,
        rights::AssignmentCache,
        test_utils::{FakeChain, FakeCodec, RecordingTransport, StaticBranches},
    };
    use parking_lot::RwLock;

    use super::*;

    async fn spawn_app(rpc_url: &str) -> String {
        let chain = Arc::new(FakeChain::new(10));
        chain.extend_to(10);
        let relay = Arc::new(BundleRelay::new(
            chain,
            Arc::new(FakeCodec::new()),
            Arc::new(RecordingTransport::new()),
            Arc::new(StaticBranches::new(["B10"])),
            Arc::new(RwLock::new(AssignmentCache::new(10))),
            RelayMetrics::new().unwrap(),
            Duration::from_secs(60),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(relay, rpc_url).unwrap());
        tokio::spawn(serve(listener, app, std::future::pending()));
        format!("http://{addr}")
    }

    #[test]
    fn accepts_both_body_shapes() {
        let bare: InjectBody = serde_json::from_str(r#""B10|a""#).unwrap();
        assert_eq!(bare.into_raw(), "B10|a");

        let wrapped: InjectBody =
            serde_json::from_str(r#"{ "rawTransactionHex": "B10|b" }"#).unwrap();
        assert_eq!(wrapped.into_raw(), "B10|b");
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut h = HeaderMap::new();
        h.insert(header::CONNECTION, "close".parse().unwrap());
        h.insert("keep-alive", "timeout=5".parse().unwrap());
        h.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());

        let out = forwardable(&h);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn inject_then_report() {
        let base = spawn_app("http://127.0.0.1:1").await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/injection/operation"))
            .json(&"B10|a")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let hash: String = resp.json().await.unwrap();
        assert_eq!(hash, FakeCodec::hash_of("B10|a").to_string());

        let resp = client
            .post(format!("{base}/inject"))
            .json(&json!({ "rawTransactionHex": "B10|a" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("already pending"));

        let text = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("flashbake_received_bundles_total 1"));
        assert!(text.contains("flashbake_pending_bundles 1"));
    }

    #[tokio::test]
    async fn unknown_paths_go_to_the_node() {
        let node = Router::new()
            .route(
                "/chains/main/blocks/head/header",
                get(|| async { Json(json!({ "level": 7 })) }),
            )
            .route("/echo", post(|body: Bytes| async move { body }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let node_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, node, std::future::pending()));

        let base = spawn_app(&node_url).await;
        let client = reqwest::Client::new();

        let header: serde_json::Value = client
            .get(format!("{base}/chains/main/blocks/head/header"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(header["level"], 7);

        let echoed = client
            .post(format!("{base}/echo?x=1"))
            .body("ping")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(echoed, "ping");

        let resp = client
            .get(format!("{base}/nowhere"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn unreachable_node_is_bad_gateway() {
        let base = spawn_app("http://127.0.0.1:1").await;
        let resp = reqwest::get(format!("{base}/chains/main/blocks/head/header"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }
}
