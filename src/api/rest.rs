use crate::config::ApiConfig;
use crate::core::{Block, Transaction, UnspentTxOut};
use crate::node::Node;
use crate::{HappeeError, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> ApiResult<T> {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn fail<T>(message: impl ToString) -> ApiResult<T> {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message.to_string())))
}

fn respond<T>(result: Result<T>) -> ApiResult<T> {
    match result {
        Ok(data) => ok(data),
        Err(e) => {
            log::warn!("❌ Request failed: {}", e);
            fail(e)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockQuery {
    pub hash: Option<String>,
    pub index: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MineBlockRequest {
    pub data: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTransactionRequest {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerRequest {
    pub peer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLookup {
    pub transaction: Transaction,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub address: String,
    pub balance: u64,
}

pub struct RestApi {
    node: Node,
    config: ApiConfig,
}

impl RestApi {
    pub fn new(node: Node, config: ApiConfig) -> Self {
        Self { node, config }
    }

    /// Serves until the node's stop signal fires.
    pub async fn start(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| HappeeError::Network(format!("Failed to bind to {}: {}", addr, e)))?;

        log::info!("✅ HTTP API listening on http://{}", addr);

        let mut shutdown = self.node.shutdown_signal();
        let app = create_router(self.node, &self.config);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // An error means the sender is gone, which also ends the server.
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| HappeeError::Network(format!("Server error: {}", e)))?;

        log::info!("🛑 HTTP API stopped");
        Ok(())
    }
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origin = if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(origin)
}

pub fn create_router(node: Node, config: &ApiConfig) -> Router {
    Router::new()
        // Chain
        .route("/blocks", get(get_blocks))
        .route("/block", get(get_block))
        .route("/transaction/:id", get(get_transaction))
        .route("/difficulty", get(get_difficulty))
        .route("/chain-length", get(get_chain_length))
        // UTXOs and wallet
        .route("/unspent-transaction-outs", get(get_unspent_tx_outs))
        .route("/my-unspent-transaction-outputs", get(get_my_unspent_tx_outs))
        .route("/balance", get(get_my_balance))
        .route("/balance/:address", get(get_balance))
        .route("/address", get(get_address))
        // Pool
        .route("/transaction-pool", get(get_transaction_pool))
        .route("/pool-size", get(get_pool_size))
        .route("/send-transaction", post(send_transaction))
        // Mining
        .route("/mine-block", post(mine_block))
        // Peers
        .route("/peers", get(get_peers))
        .route("/add-peer", post(add_peer))
        .route("/stop", post(stop))
        .layer(ServiceBuilder::new().layer(cors_layer(config)))
        .with_state(node)
}

async fn get_blocks(State(node): State<Node>) -> ApiResult<Vec<Block>> {
    ok(node.get_blockchain().await.as_ref().clone())
}

async fn get_block(State(node): State<Node>, Query(query): Query<BlockQuery>) -> ApiResult<Block> {
    let block = match (query.hash, query.index) {
        (Some(hash), _) => node.get_block_by_hash(&hash).await,
        (None, Some(index)) => node.get_block_by_index(index).await,
        (None, None) => return fail("Either hash or index is required"),
    };

    match block {
        Some(block) => ok(block),
        None => fail("Block not found"),
    }
}

async fn get_transaction(State(node): State<Node>, Path(id): Path<String>) -> ApiResult<TransactionLookup> {
    match node.find_transaction(&id).await {
        Some((transaction, confirmed)) => ok(TransactionLookup { transaction, confirmed }),
        None => fail("Transaction not found"),
    }
}

async fn get_difficulty(State(node): State<Node>) -> ApiResult<u32> {
    ok(node.difficulty().await)
}

async fn get_chain_length(State(node): State<Node>) -> ApiResult<usize> {
    ok(node.chain_length().await)
}

async fn get_unspent_tx_outs(State(node): State<Node>) -> ApiResult<Vec<UnspentTxOut>> {
    ok(node.get_unspent_tx_outs().await)
}

async fn get_my_unspent_tx_outs(State(node): State<Node>) -> ApiResult<Vec<UnspentTxOut>> {
    respond(node.get_my_unspent_tx_outs().await)
}

async fn get_my_balance(State(node): State<Node>) -> ApiResult<BalanceInfo> {
    let address = match node.address() {
        Ok(address) => address,
        Err(e) => return fail(e),
    };
    let balance = node.get_balance(&address).await;
    ok(BalanceInfo { address, balance })
}

async fn get_balance(State(node): State<Node>, Path(address): Path<String>) -> ApiResult<BalanceInfo> {
    let balance = node.get_balance(&address).await;
    ok(BalanceInfo { address, balance })
}

async fn get_address(State(node): State<Node>) -> ApiResult<String> {
    respond(node.address())
}

async fn get_transaction_pool(State(node): State<Node>) -> ApiResult<Vec<Transaction>> {
    ok(node.get_transaction_pool().await)
}

async fn get_pool_size(State(node): State<Node>) -> ApiResult<usize> {
    ok(node.pool_size().await)
}

async fn send_transaction(
    State(node): State<Node>,
    Json(req): Json<SendTransactionRequest>,
) -> ApiResult<Transaction> {
    respond(node.send_transaction(&req.address, req.amount).await)
}

/// An empty body mines the pool; `{ "data": [...] }` mines exactly those transactions.
async fn mine_block(State(node): State<Node>, body: Bytes) -> ApiResult<Block> {
    let data = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<MineBlockRequest>(&body) {
            Ok(req) => Some(req.data),
            Err(e) => return fail(format!("Invalid block data: {}", e)),
        }
    };

    respond(node.mine_block(data).await)
}

async fn get_peers(State(node): State<Node>) -> ApiResult<Vec<String>> {
    ok(node.list_peers().await)
}

async fn add_peer(State(node): State<Node>, Json(req): Json<AddPeerRequest>) -> ApiResult<String> {
    respond(node.add_peer(&req.peer).await.map(|_| req.peer))
}

async fn stop(State(node): State<Node>) -> ApiResult<String> {
    node.stop();
    ok("Stopping node".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::Blockchain;
    use crate::crypto::keys::PrivateKey;
    use crate::wallet::Wallet;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app(dir: &TempDir) -> (Node, Router) {
        let node = Node::new(Blockchain::new(None).unwrap(), Wallet::new(dir.path())).unwrap();
        let router = create_router(node.clone(), &Config::default().api);
        (node, router)
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_chain_queries() {
        let dir = TempDir::new().unwrap();
        let (_, router) = test_app(&dir);

        let (status, json) = call(&router, Method::GET, "/blocks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);

        let (status, json) = call(&router, Method::GET, "/block?index=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["hash"], crate::core::block::GENESIS_HASH);

        let (status, json) = call(&router, Method::GET, "/block?index=5", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Block not found");

        let (_, json) = call(&router, Method::GET, "/difficulty", None).await;
        assert_eq!(json["data"], 0);
    }

    #[tokio::test]
    async fn test_mine_then_send() {
        let dir = TempDir::new().unwrap();
        let (node, router) = test_app(&dir);
        let bob = PrivateKey::new().unwrap().address();

        let (status, json) = call(&router, Method::POST, "/mine-block", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["index"], 1);

        let (status, _) = call(
            &router,
            Method::POST,
            "/send-transaction",
            Some(serde_json::json!({ "address": bob, "amount": 30 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, json) = call(&router, Method::GET, "/pool-size", None).await;
        assert_eq!(json["data"], 1);

        let (_, json) = call(&router, Method::GET, "/balance", None).await;
        assert_eq!(json["data"]["balance"], 50);
        assert_eq!(json["data"]["address"], node.address().unwrap());
    }

    #[tokio::test]
    async fn test_bad_requests_get_400() {
        let dir = TempDir::new().unwrap();
        let (_, router) = test_app(&dir);
        let bob = PrivateKey::new().unwrap().address();

        let (status, json) = call(
            &router,
            Method::POST,
            "/send-transaction",
            Some(serde_json::json!({ "address": bob, "amount": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Insufficient funds"));

        let (status, _) = call(
            &router,
            Method::POST,
            "/mine-block",
            Some(serde_json::json!({ "data": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&router, Method::GET, "/transaction/unknown", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_signals_node() {
        let dir = TempDir::new().unwrap();
        let (node, router) = test_app(&dir);
        let signal = node.shutdown_signal();

        let (status, _) = call(&router, Method::POST, "/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(*signal.borrow());
    }
}
