//! HTTP route layer for a Minichain node
//!
//! Every response is a JSON object `{status, message, timestamp, ...data}`
//! where `status` is `"success"` below 400 and `"error"` otherwise.

use axum::{
    extract::{Path, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::error::ChainError;
use crate::node::Node;

// ============================================================================
// Response Envelope
// ============================================================================

fn respond(status: StatusCode, message: impl Into<String>, data: Value) -> Response {
    let mut body = Map::new();
    body.insert(
        "status".to_string(),
        json!(if status.as_u16() < 400 { "success" } else { "error" }),
    );
    body.insert("message".to_string(), json!(message.into()));
    body.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    if let Value::Object(extra) = data {
        body.extend(extra);
    }
    (status, Json(Value::Object(body))).into_response()
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::BlockchainError(e) => match e {
                ChainError::ContractNotFound(_) => StatusCode::NOT_FOUND,
                ChainError::ContractTimeout(_) => StatusCode::REQUEST_TIMEOUT,
                ChainError::StaleTip => StatusCode::CONFLICT,
                ChainError::PersistenceError(_) | ChainError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BlockchainError(e) => e.to_string(),
            ApiError::InvalidInput(msg) => msg,
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), "{}", message);
        }
        respond(status, message, Value::Null)
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

/// Reject a request body that lacks any of the named fields.
fn require_fields(fields: &[(&str, bool)]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!(
            "Missing fields: {}",
            missing.join(", ")
        )))
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct MineRequest {
    pub miner_address: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterNodesRequest {
    pub nodes: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct TransactionRequest {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub amount: Option<f64>,
}

impl TransactionRequest {
    fn into_parts(self) -> Result<(String, String, f64), ApiError> {
        require_fields(&[
            ("sender", self.sender.is_some()),
            ("receiver", self.receiver.is_some()),
            ("amount", self.amount.is_some()),
        ])?;
        match (self.sender, self.receiver, self.amount) {
            (Some(sender), Some(receiver), Some(amount)) => Ok((sender, receiver, amount)),
            _ => Err(ApiError::InvalidInput("Missing fields".to_string())),
        }
    }
}

#[derive(Deserialize)]
pub struct DeployRequest {
    pub code: Option<String>,
    pub owner: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub params: Map<String, Value>,
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    info!(method = %method, path = %path, "Incoming request");

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );
    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the router with all endpoints.
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        // Ledger endpoints
        .route("/mine_block", post(mine_block))
        .route("/get_chain", get(get_chain))
        .route("/replace_chain", post(replace_chain))
        .route("/is_valid", get(is_valid))
        .route("/get_balance/:user", get(get_balance))
        .route("/load_chain", get(load_chain))
        // Transaction endpoints
        .route("/add_transaction", post(add_transaction))
        .route("/broadcast_transaction", post(broadcast_transaction))
        // Network endpoints
        .route("/register_node", post(register_node))
        // Contract endpoints
        .route("/deploy_contract", post(deploy_contract))
        .route("/execute_contract/:address", post(execute_contract))
        // System endpoints
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
        .layer(cors)
}

/// Serve the API on `0.0.0.0:<network.api_port>` until the listener fails.
pub async fn run_api_server(node: Arc<Node>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], node.config().network.api_port));
    let app = build_api_router(node);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn mine_block(
    State(node): State<Arc<Node>>,
    Json(req): Json<MineRequest>,
) -> Result<Response, ApiError> {
    info!("Processing mine_block request");
    let miner_address = req.miner_address.ok_or_else(|| {
        ApiError::InvalidInput("Miner address is required to proceed".to_string())
    })?;
    let block = node.mine(&miner_address).await?;
    let data = serde_json::to_value(&block).map_err(ChainError::from)?;
    Ok(respond(StatusCode::OK, "Congratulations on mining a block!", data))
}

async fn register_node(
    State(node): State<Arc<Node>>,
    Json(req): Json<RegisterNodesRequest>,
) -> Result<Response, ApiError> {
    let nodes = req
        .nodes
        .ok_or_else(|| ApiError::InvalidInput("No nodes provided".to_string()))?;
    let total_nodes = node.register_nodes(&nodes).await?;
    Ok(respond(
        StatusCode::CREATED,
        format!("{} Nodes have been added to the network", total_nodes.len()),
        json!({ "total_nodes": total_nodes }),
    ))
}

async fn get_chain(State(node): State<Arc<Node>>) -> Response {
    let chain = node.get_chain().await;
    respond(
        StatusCode::OK,
        "Blockchain length fetch successful",
        json!({ "chain": chain.chain, "length": chain.length }),
    )
}

async fn replace_chain(State(node): State<Arc<Node>>) -> Response {
    let is_replaced = node.replace_chain().await;
    let chain = node.get_chain().await;
    let message = if is_replaced {
        "The chain was replaced by the longest one"
    } else {
        "The chain is already the longest one"
    };
    respond(
        StatusCode::OK,
        message,
        json!({ "is_replaced": is_replaced, "chain": chain.chain }),
    )
}

async fn is_valid(State(node): State<Arc<Node>>) -> Response {
    respond(
        StatusCode::OK,
        "Blockchain validity check completed",
        json!({ "is_valid": node.is_valid().await }),
    )
}

async fn get_balance(State(node): State<Arc<Node>>, Path(user): Path<String>) -> Response {
    let balance = node.get_balance(&user).await;
    respond(
        StatusCode::OK,
        format!("Fetched {}'s balance successfully", user),
        json!({ "user": user, "balance": balance }),
    )
}

async fn load_chain(State(node): State<Arc<Node>>) -> Response {
    match node.load_chain().await {
        Ok(true) => respond(StatusCode::OK, "Blockchain loaded from memory", Value::Null),
        Ok(false) => respond(
            StatusCode::BAD_REQUEST,
            "Error loading blockchain from memory, starting fresh.",
            Value::Null,
        ),
        Err(e) => {
            error!("Failed to load chain: {}", e);
            respond(
                StatusCode::BAD_REQUEST,
                "Error loading blockchain from memory, starting fresh.",
                Value::Null,
            )
        }
    }
}

async fn add_transaction(
    State(node): State<Arc<Node>>,
    Json(req): Json<TransactionRequest>,
) -> Result<Response, ApiError> {
    let (sender, receiver, amount) = req.into_parts()?;
    let index = node.submit_transaction(&sender, &receiver, amount).await?;
    Ok(respond(
        StatusCode::CREATED,
        format!("Transaction will be added in block {}", index),
        json!({ "index": index }),
    ))
}

async fn broadcast_transaction(
    State(node): State<Arc<Node>>,
    Json(req): Json<TransactionRequest>,
) -> Result<Response, ApiError> {
    let (sender, receiver, amount) = req.into_parts()?;
    match node.submit_transaction(&sender, &receiver, amount).await {
        Ok(index) => Ok(respond(
            StatusCode::CREATED,
            format!("Transaction will be added to block {}", index),
            json!({ "index": index }),
        )),
        Err(e) => Ok(respond(
            StatusCode::BAD_REQUEST,
            format!("Transaction failed: {}", e),
            Value::Null,
        )),
    }
}

async fn deploy_contract(
    State(node): State<Arc<Node>>,
    Json(req): Json<DeployRequest>,
) -> Result<Response, ApiError> {
    require_fields(&[("code", req.code.is_some()), ("owner", req.owner.is_some())])?;
    let code = req.code.unwrap_or_default();
    let owner = req.owner.unwrap_or_default();
    let address = node.deploy_contract(&code, &owner).await?;
    Ok(respond(
        StatusCode::CREATED,
        "Contract deployed successfully",
        json!({ "address": address }),
    ))
}

async fn execute_contract(
    State(node): State<Arc<Node>>,
    Path(address): Path<String>,
    body: Option<Json<ExecuteRequest>>,
) -> Result<Response, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = node.execute_contract(&address, req.params).await?;
    Ok(respond(
        StatusCode::OK,
        "Contract executed successfully",
        json!({
            "address": address,
            "state": outcome.state,
            "gas_used": outcome.gas_used,
            "result": outcome.result,
        }),
    ))
}

async fn health_check() -> Response {
    respond(
        StatusCode::OK,
        "Service is healthy",
        json!({ "status": "healthy" }),
    )
}
