//! # HTTP API
//!
//! Axum router for the daemon. Peers' messages come in as JSON, the list
//! goes out as JSON. All handlers share [`AppState`].
//!
//! ## Endpoints
//!
//! | Method | Path            | Description                               |
//! |--------|-----------------|-------------------------------------------|
//! | GET    | `/health`       | Liveness check                            |
//! | GET    | `/status`       | Sync status and record counts per state   |
//! | GET    | `/znodes`       | Every known record                        |
//! | POST   | `/broadcast`    | Submit a znode announcement               |
//! | POST   | `/ping`         | Submit a znode ping                       |
//! | POST   | `/chain/blocks` | Append blocks stamped with the node clock |
//! | POST   | `/chain/coins`  | Add an unspent output                     |
//! | POST   | `/chain/spend`  | Mark an output spent                      |
//!
//! The `/chain/*` routes are the block source of the in-memory chain.
//! Message validation takes locks and verifies signatures, so it runs on
//! the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use znode_protocol::chain::{ChainStateOracle, MemoryChain};
use znode_protocol::config::{NetworkMode, PROTOCOL_VERSION};
use znode_protocol::network::{Acceptance, RelayQueue, SyncTracker, ZnodeList};
use znode_protocol::znode::{ZnodeBroadcast, ZnodeEnv, ZnodeError, ZnodePing};

use crate::chain::{add_coin, parse_outpoint, SeedCoin};
use crate::metrics::SharedMetrics;

/// Upper bound on blocks appended by one `/chain/blocks` call.
pub const MAX_BLOCKS_PER_REQUEST: u32 = 10_000;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub list: Arc<ZnodeList>,
    pub env: ZnodeEnv<MemoryChain>,
    pub relay: Arc<RelayQueue>,
    pub metrics: SharedMetrics,
    pub network: NetworkMode,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: String,
    protocol_version: u32,
    network: NetworkMode,
    blockchain_synced: bool,
    list_synced: bool,
    znodes: usize,
    enabled: usize,
    states: BTreeMap<&'static str, usize>,
    seen_broadcasts: usize,
    seen_pings: usize,
    relay_pending: usize,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    result: &'static str,
}

#[derive(Debug, Serialize)]
struct RejectResponse {
    error: String,
    class: &'static str,
    dos: u32,
}

#[derive(Debug, Deserialize)]
struct BlocksRequest {
    #[serde(default = "one")]
    count: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct SpendRequest {
    txid: String,
    index: u32,
}

#[derive(Debug, Serialize)]
struct TipResponse {
    height: u32,
    hash: String,
    time: i64,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/znodes", get(znodes_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/ping", post(ping_handler))
        .route("/chain/blocks", post(blocks_handler))
        .route("/chain/coins", post(coins_handler))
        .route("/chain/spend", post(spend_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let states = state
        .list
        .count_by_state()
        .into_iter()
        .map(|(s, n)| (s.as_str(), n))
        .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: PROTOCOL_VERSION,
        network: state.network,
        blockchain_synced: state.env.sync.is_blockchain_synced(),
        list_synced: state.env.sync.is_list_synced(),
        znodes: state.list.len(),
        enabled: state.list.count_enabled(),
        states,
        seen_broadcasts: state.list.seen_broadcast_count(),
        seen_pings: state.list.seen_ping_count(),
        relay_pending: state.relay.pending_len(),
    })
}

async fn znodes_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.list.infos())
}

/// `POST /broadcast`. Rejections carry the misbehavior weight the P2P
/// layer should charge the sender.
async fn broadcast_handler(
    State(state): State<AppState>,
    Json(mnb): Json<ZnodeBroadcast>,
) -> Response {
    blocking(move || {
        let result = state.list.process_broadcast(mnb, &state.env, None);
        state.metrics.record("broadcast", &result);
        respond(result)
    })
    .await
}

async fn ping_handler(State(state): State<AppState>, Json(ping): Json<ZnodePing>) -> Response {
    blocking(move || {
        let result = state.list.process_ping(&ping, &state.env, None);
        state.metrics.record("ping", &result);
        respond(result)
    })
    .await
}

async fn blocks_handler(
    State(state): State<AppState>,
    Json(req): Json<BlocksRequest>,
) -> Response {
    if req.count == 0 || req.count > MAX_BLOCKS_PER_REQUEST {
        return bad_request(format!(
            "count must be between 1 and {MAX_BLOCKS_PER_REQUEST}"
        ));
    }
    blocking(move || {
        let now = state.env.now();
        let mut chain = state.env.chain.write();
        for _ in 0..req.count {
            chain.push_block(now);
        }
        match chain.tip() {
            Some(tip) => {
                tracing::debug!(height = tip.height, count = req.count, "blocks appended");
                Json(TipResponse {
                    height: tip.height,
                    hash: tip.hash.to_string(),
                    time: tip.time,
                })
                .into_response()
            }
            None => internal_error("chain has no tip after appending"),
        }
    })
    .await
}

async fn coins_handler(State(state): State<AppState>, Json(coin): Json<SeedCoin>) -> Response {
    blocking(move || match add_coin(&mut state.env.chain.write(), &coin) {
        Ok(outpoint) => {
            tracing::debug!(%outpoint, value = coin.value, "coin added");
            Json(serde_json::json!({ "outpoint": outpoint.to_string() })).into_response()
        }
        Err(e) => bad_request(format!("{e:#}")),
    })
    .await
}

async fn spend_handler(State(state): State<AppState>, Json(req): Json<SpendRequest>) -> Response {
    let outpoint = match parse_outpoint(&req.txid, req.index) {
        Ok(outpoint) => outpoint,
        Err(e) => return bad_request(format!("{e:#}")),
    };
    blocking(move || {
        let mut chain = state.env.chain.write();
        if chain.get_coin(&outpoint).is_none() {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("unknown output {outpoint}") })),
            )
                .into_response();
        }
        chain.spend(&outpoint);
        tracing::debug!(%outpoint, "coin spent");
        Json(serde_json::json!({ "spent": outpoint.to_string() })).into_response()
    })
    .await
}

/// Runs `f` on the blocking pool.
async fn blocking<F>(f: F) -> Response
where
    F: FnOnce() -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "handler task failed");
            internal_error("handler task failed")
        }
    }
}

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": error })),
    )
        .into_response()
}

fn internal_error(error: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": error })),
    )
        .into_response()
}

fn respond(result: Result<Acceptance, ZnodeError>) -> Response {
    match result {
        Ok(acceptance) => (
            StatusCode::OK,
            Json(SubmitResponse {
                result: acceptance.as_str(),
            }),
        )
            .into_response(),
        Err(e) => {
            let status = if e.is_retryable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_REQUEST
            };
            (
                status,
                Json(RejectResponse {
                    error: e.to_string(),
                    class: e.class().as_str(),
                    dos: e.dos_weight(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use znode_protocol::chain::{ChainHandle, OutPoint};
    use znode_protocol::clock::{Clock, ManualClock};
    use znode_protocol::config::{NetworkParams, ZNODE_CHECK_SECONDS, ZNODE_COLLATERAL};
    use znode_protocol::crypto::ZnodeKeypair;
    use znode_protocol::network::ZnodeSync;
    use znode_protocol::wallet::KeyringWallet;
    use znode_protocol::znode::AnnounceRequest;

    use crate::chain::refresh_sync;
    use crate::metrics::NodeMetrics;

    const T0: i64 = 1_700_000_000;
    const TX: [u8; 32] = [0x42; 32];

    fn test_app_state() -> AppState {
        let mut chain = MemoryChain::with_blocks(100, T0 - 99 * 150, 150);
        chain.add_coin(OutPoint::new(TX, 0), ZNODE_COLLATERAL, 50);

        let relay = Arc::new(RelayQueue::default());
        let env = ZnodeEnv::new(
            ChainHandle::new(chain),
            NetworkParams::for_mode(NetworkMode::Mainnet),
            Arc::new(ManualClock::new(T0)),
            Arc::new(ZnodeSync::synced()),
            relay.clone(),
        );

        AppState {
            list: Arc::new(ZnodeList::default()),
            env,
            relay,
            metrics: Arc::new(NodeMetrics::new().unwrap()),
            network: NetworkMode::Mainnet,
        }
    }

    fn announcement(state: &AppState, znode_key: &ZnodeKeypair) -> ZnodeBroadcast {
        let wallet = KeyringWallet::new();
        wallet.insert(OutPoint::new(TX, 0), ZnodeKeypair::from_seed(&[9; 32]));
        let tx = hex::encode(TX);
        ZnodeBroadcast::create(
            AnnounceRequest {
                service: "8.8.4.4:8168".parse().unwrap(),
                collateral_tx: &tx,
                collateral_index: 0,
                znode_key,
            },
            &wallet,
            &state.env,
            false,
        )
        .unwrap()
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn post_json<T: Serialize>(router: &Router, path: &str, body: &T) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn submitted_broadcast_shows_up_in_the_list() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let mnb = announcement(&state, &ZnodeKeypair::from_seed(&[3; 32]));

        let (status, body) = post_json(&router, "/broadcast", &mnb).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        assert_eq!(json(&body)["result"], "created");

        let (_, body) = post_json(&router, "/broadcast", &mnb).await;
        assert_eq!(json(&body)["result"], "already_seen");

        let (status, body) = get(&router, "/znodes").await;
        assert_eq!(status, StatusCode::OK);
        let znodes = json(&body);
        assert_eq!(znodes.as_array().unwrap().len(), 1);
        assert_eq!(znodes[0]["state"], "PRE_ENABLED");

        let (_, body) = get(&router, "/status").await;
        let status = json(&body);
        assert_eq!(status["znodes"], 1);
        assert_eq!(status["states"]["PRE_ENABLED"], 1);
        assert_eq!(status["network"], "mainnet");
        assert_eq!(status["relay_pending"], 1);
    }

    #[tokio::test]
    async fn forged_ping_reports_its_dos_weight() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let znode_key = ZnodeKeypair::from_seed(&[3; 32]);
        let mnb = announcement(&state, &znode_key);
        post_json(&router, "/broadcast", &mnb).await;

        let mut ping = mnb.last_ping.clone().unwrap();
        ping.sig_time += 600;
        let (status, body) = post_json(&router, "/ping", &ping).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let reject = json(&body);
        assert_eq!(reject["dos"], 33);
        assert_eq!(reject["class"], "structural");
        assert_eq!(state.metrics.dos_points_total.get(), 33);
    }

    fn empty_app_state() -> (AppState, Arc<ZnodeSync>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let sync = Arc::new(ZnodeSync::new());
        let relay = Arc::new(RelayQueue::default());
        let env = ZnodeEnv::new(
            ChainHandle::new(MemoryChain::new()),
            NetworkParams::for_mode(NetworkMode::Mainnet),
            clock.clone(),
            sync.clone(),
            relay.clone(),
        );
        let state = AppState {
            list: Arc::new(ZnodeList::default()),
            env,
            relay,
            metrics: Arc::new(NodeMetrics::new().unwrap()),
            network: NetworkMode::Mainnet,
        };
        (state, sync, clock)
    }

    #[tokio::test]
    async fn fed_chain_lets_a_fresh_daemon_register_znodes() {
        let (state, sync, clock) = empty_app_state();
        let router = create_router(state.clone());

        let (status, body) = post_json(&router, "/chain/blocks", &serde_json::json!({ "count": 300 })).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        assert_eq!(json(&body)["height"], 299);

        let coin = serde_json::json!({
            "txid": hex::encode(TX),
            "index": 0,
            "value": ZNODE_COLLATERAL,
            "height": 100
        });
        let (status, _) = post_json(&router, "/chain/coins", &coin).await;
        assert_eq!(status, StatusCode::OK);

        for _ in 0..3 {
            refresh_sync(&state.env.chain.view(), &sync, clock.now());
        }
        let (_, body) = get(&router, "/status").await;
        assert_eq!(json(&body)["blockchain_synced"], true);
        assert_eq!(json(&body)["list_synced"], true);

        let mnb = announcement(&state, &ZnodeKeypair::from_seed(&[3; 32]));
        let (status, body) = post_json(&router, "/broadcast", &mnb).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        assert_eq!(json(&body)["result"], "created");
        assert_eq!(state.list.len(), 1);

        let spend = serde_json::json!({ "txid": hex::encode(TX), "index": 0 });
        let (status, _) = post_json(&router, "/chain/spend", &spend).await;
        assert_eq!(status, StatusCode::OK);

        clock.advance(ZNODE_CHECK_SECONDS);
        state.list.check_all(&state.env, None);
        let (_, body) = get(&router, "/znodes").await;
        assert_eq!(json(&body)[0]["state"], "OUTPOINT_SPENT");
    }

    #[tokio::test]
    async fn chain_routes_validate_their_input() {
        let (state, _, _) = empty_app_state();
        let router = create_router(state);

        let (status, _) = post_json(&router, "/chain/blocks", &serde_json::json!({ "count": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let coin = serde_json::json!({ "txid": hex::encode(TX), "index": 0, "value": 1 });
        let (status, body) = post_json(&router, "/chain/coins", &coin).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&body)["error"].as_str().unwrap().contains("empty chain"));

        let (status, body) = post_json(&router, "/chain/blocks", &serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["height"], 0);

        let spend = serde_json::json!({ "txid": hex::encode(TX), "index": 5 });
        let (status, _) = post_json(&router, "/chain/spend", &spend).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let spend = serde_json::json!({ "txid": "zz", "index": 0 });
        let (status, _) = post_json(&router, "/chain/spend", &spend).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ping_for_unknown_znode_is_retryable() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let mnb = announcement(&state, &ZnodeKeypair::from_seed(&[3; 32]));

        let ping = mnb.last_ping.unwrap();
        let (status, body) = post_json(&router, "/ping", &ping).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body)["dos"], 0);
    }
}
