//! HTTP facade for art clients.
//!
//! Exposes open/close canvas, add/delete shape and the tagged gets over
//! JSON. Add and delete block until the op is confirmed on the chain the
//! miner currently follows: the call waits on tip changes (with a
//! 5 x validate-num second poll floor), re-submitting after
//! 2 x validate-num minutes without confirmation.

use crate::block::{BlockHash, Op, OpHash};
use crate::chain::{ChainStore, OpIngest};
use crate::crypto::{verify_signature, KeyPair, OpSig, CANVAS_REG_MESSAGE};
use crate::error::ChainError;
use crate::network::NetworkNode;
use crate::shape::Shape;
use crate::svg::ShapeKind;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

/// Seconds between confirmation polls, per unit of validate-num.
const POLL_SECS_PER_VALIDATE_NUM: u64 = 5;
/// Minutes before an unconfirmed op is re-submitted, per unit of
/// validate-num.
const RESUBMIT_MINS_PER_VALIDATE_NUM: u64 = 2;

/// Shared state behind the facade.
#[derive(Clone)]
pub struct ApiNode {
    pub chain: Arc<RwLock<ChainStore>>,
    pub network: Arc<NetworkNode>,
    keypair: KeyPair,
}

/// Facade-level error: a [`ChainError`] rendered with its stable identity.
#[derive(Debug)]
pub struct ApiError(ChainError);

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// The stable kind string an art client matches on.
    fn kind(&self) -> &'static str {
        match &self.0 {
            ChainError::Disconnected(_) => "disconnected",
            ChainError::InsufficientInk(_) => "insufficient-ink",
            ChainError::InvalidSvg(_) => "invalid-svg",
            ChainError::SvgTooLong(_) => "svg-too-long",
            ChainError::InvalidShapeHash(_) => "invalid-shape-hash",
            ChainError::ShapeOwner(_) => "shape-owner",
            ChainError::OutOfBounds => "out-of-bounds",
            ChainError::ShapeOverlap(_) => "overlap",
            ChainError::InvalidBlockHash(_) => "invalid-block-hash",
            _ => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            ChainError::Disconnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChainError::InvalidShapeHash(_) | ChainError::InvalidBlockHash(_) => {
                StatusCode::NOT_FOUND
            }
            ChainError::ShapeOwner(_) => StatusCode::FORBIDDEN,
            ChainError::ShapeOverlap(_) => StatusCode::CONFLICT,
            ChainError::InsufficientInk(_)
            | ChainError::InvalidSvg(_)
            | ChainError::SvgTooLong(_)
            | ChainError::OutOfBounds
            | ChainError::InvalidOp(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.0.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

// ----------------------------------------------------------------------------
// Request / response types
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OpenCanvasRequest {
    /// Signature over the fixed registration constant, in (R, S) hex.
    pub sig_r: String,
    pub sig_s: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenCanvasResponse {
    pub canvas_x_max: u32,
    pub canvas_y_max: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseCanvasResponse {
    pub ink_remaining: u32,
}

#[derive(Debug, Deserialize)]
pub struct AddShapeRequest {
    pub validate_num: u8,
    pub kind: ShapeKind,
    pub svg: String,
    pub fill: String,
    pub stroke: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddShapeResponse {
    pub shape_hash: OpHash,
    pub block_hash: BlockHash,
    pub ink_remaining: u32,
}

#[derive(Debug, Deserialize)]
pub struct DeleteShapeRequest {
    pub validate_num: u8,
    pub shape_hash: OpHash,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteShapeResponse {
    pub ink_remaining: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InkResponse {
    pub ink_remaining: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SvgResponse {
    pub svg: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashListResponse {
    pub hashes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenesisResponse {
    pub block_hash: BlockHash,
}

// ----------------------------------------------------------------------------
// Facade
// ----------------------------------------------------------------------------

impl ApiNode {
    pub fn new(
        chain: Arc<RwLock<ChainStore>>,
        network: Arc<NetworkNode>,
        keypair: KeyPair,
    ) -> Self {
        ApiNode {
            chain,
            network,
            keypair,
        }
    }

    fn pubkey(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Sign, queue and gossip an op, then block until it is confirmed on
    /// the current tip. `confirmed` decides what "confirmed" means: for an
    /// add, the op hash appears in the live canvas; for a delete, the
    /// matching add-op hash disappears from it.
    async fn disseminate_and_wait<F>(
        &self,
        op: Op,
        confirmed: F,
    ) -> Result<BlockHash, ApiError>
    where
        F: Fn(&ChainStore) -> Option<BlockHash>,
    {
        let validate_num = op.validate_num;
        let poll = Duration::from_secs((u64::from(validate_num) * POLL_SECS_PER_VALIDATE_NUM).max(1));
        let resubmit_after =
            Duration::from_secs((u64::from(validate_num) * RESUBMIT_MINS_PER_VALIDATE_NUM * 60).max(60));

        loop {
            // (re-)submit and gossip
            {
                let outcome = self.chain.write().await.submit_op(op.clone());
                match outcome {
                    Ok(OpIngest::Queued(hash)) => {
                        debug!(op = %hash, add = op.add, "op queued from client");
                        self.network.flood_op(&op).await;
                    }
                    Ok(OpIngest::AlreadyKnown) => {}
                    Err(err) => return Err(err.into()),
                }
            }

            let mut tip_rx = self.chain.read().await.subscribe_tip();
            let deadline = tokio::time::Instant::now() + resubmit_after;

            loop {
                if let Some(block_hash) = confirmed(&*self.chain.read().await) {
                    return Ok(block_hash);
                }

                tokio::select! {
                    changed = tip_rx.changed() => {
                        if changed.is_err() {
                            return Err(ChainError::Disconnected("chain store closed".to_string()).into());
                        }
                    }
                    _ = tokio::time::sleep(poll) => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        // timeout: re-submit the op and keep waiting
                        debug!(validate_num, "confirmation timeout, re-submitting op");
                        break;
                    }
                }
            }
        }
    }

    pub async fn add_shape(&self, req: AddShapeRequest) -> Result<AddShapeResponse, ApiError> {
        let shape = Shape {
            owner: self.pubkey(),
            kind: req.kind,
            svg: req.svg,
            fill: req.fill,
            stroke: req.stroke,
        };

        // fail fast on ink before signing and gossiping
        let cost = shape.area().map_err(ApiError::from)? as u32;
        {
            let chain = self.chain.read().await;
            let ink = chain.ink_of(&self.pubkey());
            if cost > ink {
                return Err(ChainError::InsufficientInk(ink).into());
            }
        }

        let sig = self
            .keypair
            .sign(&shape.content_hash())
            .map_err(ApiError::from)?;
        let op = Op {
            add: true,
            shape,
            sig,
            pubkey: self.pubkey(),
            validate_num: req.validate_num,
        };
        let op_hash = op.hash_hex();

        let wait_hash = op_hash.clone();
        let block_hash = self
            .disseminate_and_wait(op, move |chain| {
                chain.canvas_entry(&wait_hash).map(|e| e.block_hash.clone())
            })
            .await?;

        let ink_remaining = self.chain.read().await.ink_of(&self.pubkey());
        Ok(AddShapeResponse {
            shape_hash: op_hash,
            block_hash,
            ink_remaining,
        })
    }

    pub async fn delete_shape(
        &self,
        req: DeleteShapeRequest,
    ) -> Result<DeleteShapeResponse, ApiError> {
        let add_op = {
            let chain = self.chain.read().await;

            let entry = chain
                .canvas_entry(&req.shape_hash)
                .ok_or_else(|| ChainError::InvalidShapeHash(req.shape_hash.clone()))?;
            if entry.shape.owner != self.pubkey() {
                return Err(ChainError::ShapeOwner(entry.shape.owner.clone()).into());
            }

            chain
                .logged_op(&req.shape_hash)
                .cloned()
                .ok_or_else(|| ChainError::InvalidShapeHash(req.shape_hash.clone()))?
        };

        // a delete is the stored add op with the flag flipped
        let delete_op = add_op.with_add(false);

        let add_hash = req.shape_hash.clone();
        self.disseminate_and_wait(delete_op, move |chain| {
            if chain.canvas_entry(&add_hash).is_none() {
                Some(chain.tip_hash().clone())
            } else {
                None
            }
        })
        .await?;

        let ink_remaining = self.chain.read().await.ink_of(&self.pubkey());
        Ok(DeleteShapeResponse { ink_remaining })
    }
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

async fn open_canvas(
    State(node): State<ApiNode>,
    Json(req): Json<OpenCanvasRequest>,
) -> Result<Json<OpenCanvasResponse>, ApiError> {
    let decode = |hex_str: &str| -> Result<[u8; 32], ApiError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ChainError::CryptoError(format!("invalid signature hex: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| ChainError::CryptoError("signature half must be 32 bytes".to_string()).into())
    };
    let sig = OpSig {
        r: decode(&req.sig_r)?,
        s: decode(&req.sig_s)?,
    };

    // the client proves custody of the miner's key pair
    let pubkey = node.pubkey();
    verify_signature(&pubkey, CANVAS_REG_MESSAGE, &sig)
        .map_err(|_| ChainError::Disconnected(node.network.listen_addr().to_string()))?;

    let chain = node.chain.read().await;
    let canvas = chain.settings().canvas;
    Ok(Json(OpenCanvasResponse {
        canvas_x_max: canvas.canvas_x_max,
        canvas_y_max: canvas.canvas_y_max,
    }))
}

async fn close_canvas(State(node): State<ApiNode>) -> Json<CloseCanvasResponse> {
    let ink_remaining = node.chain.read().await.ink_of(&node.pubkey());
    Json(CloseCanvasResponse { ink_remaining })
}

async fn add_shape(
    State(node): State<ApiNode>,
    Json(req): Json<AddShapeRequest>,
) -> Result<Json<AddShapeResponse>, ApiError> {
    node.add_shape(req).await.map(Json)
}

async fn delete_shape(
    State(node): State<ApiNode>,
    Json(req): Json<DeleteShapeRequest>,
) -> Result<Json<DeleteShapeResponse>, ApiError> {
    node.delete_shape(req).await.map(Json)
}

async fn get_ink(State(node): State<ApiNode>) -> Json<InkResponse> {
    let ink_remaining = node.chain.read().await.ink_of(&node.pubkey());
    Json(InkResponse { ink_remaining })
}

async fn get_svg(
    State(node): State<ApiNode>,
    Path(shape_hash): Path<String>,
) -> Result<Json<SvgResponse>, ApiError> {
    let svg = node.chain.read().await.get_svg_fields(&shape_hash)?;
    Ok(Json(SvgResponse { svg }))
}

async fn get_shapes(
    State(node): State<ApiNode>,
    Path(block_hash): Path<String>,
) -> Result<Json<HashListResponse>, ApiError> {
    let hashes = node.chain.read().await.get_shapes(&block_hash)?;
    Ok(Json(HashListResponse { hashes }))
}

async fn get_genesis(State(node): State<ApiNode>) -> Json<GenesisResponse> {
    let block_hash = node.chain.read().await.genesis_hash().clone();
    Json(GenesisResponse { block_hash })
}

async fn get_children(
    State(node): State<ApiNode>,
    Path(block_hash): Path<String>,
) -> Result<Json<HashListResponse>, ApiError> {
    let hashes = node.chain.read().await.get_children(&block_hash)?;
    Ok(Json(HashListResponse { hashes }))
}

/// Build the facade router.
pub fn router(node: ApiNode) -> Router {
    Router::new()
        .route("/canvas/open", post(open_canvas))
        .route("/canvas/close", post(close_canvas))
        .route("/shapes", post(add_shape).delete(delete_shape))
        .route("/ink", get(get_ink))
        .route("/svg/:shape_hash", get(get_svg))
        .route("/shapes/:block_hash", get(get_shapes))
        .route("/genesis", get(get_genesis))
        .route("/children/:block_hash", get(get_children))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(node)
}

/// Serve the facade until the process exits.
pub async fn run_api_server(node: ApiNode, listener: TcpListener) -> crate::error::Result<()> {
    axum::serve(listener, router(node))
        .await
        .map_err(|e| ChainError::IoError(e.to_string()))
}
