//! Signed claim endpoints

use crate::error::{ApiError, ApiResult};
use crate::signature::{bind_message, gen_message};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use invite_core::{CodeType, Owner};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    #[serde(default)]
    pub user_address: String,
    #[serde(default)]
    pub discord_id: String,
    #[serde(default)]
    pub discord_name: String,
    #[serde(default)]
    pub invite_code: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BindResponse {
    pub invite_code: String,
    pub code_type: CodeType,
    pub bound_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenRequest {
    #[serde(default)]
    pub user_address: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenResponse {
    pub invite_code: String,
}

fn require(fields: &[(&str, &str)]) -> ApiResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("missing {}", missing.join(", "))))
    }
}

async fn verify(
    state: &AppState,
    address: &str,
    message: &str,
    signature: &str,
    timestamp: u64,
) -> ApiResult<()> {
    state
        .signatures
        .check(address, message, signature, timestamp, Utc::now().timestamp())
        .await
        .map_err(|reason| {
            warn!(address, %reason, "signature rejected");
            ApiError::Signature(reason)
        })
}

/// Bind a presented direct or water code to the signing wallet and its
/// Discord account.
pub async fn bind(
    State(state): State<AppState>,
    payload: Result<Json<BindRequest>, JsonRejection>,
) -> ApiResult<Json<BindResponse>> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    require(&[
        ("user_address", req.user_address.as_str()),
        ("discord_id", req.discord_id.as_str()),
        ("discord_name", req.discord_name.as_str()),
        ("invite_code", req.invite_code.as_str()),
        ("signature", req.signature.as_str()),
    ])?;
    if req.timestamp == 0 {
        return Err(ApiError::BadRequest("missing timestamp".to_string()));
    }

    let address = req.user_address.trim().to_ascii_lowercase();
    let message = bind_message(&req.invite_code, &req.discord_id, &req.discord_name, req.timestamp);
    verify(&state, &address, &message, &req.signature, req.timestamp).await?;

    let owner = Owner::wallet(&address).with_discord(req.discord_id, Some(req.discord_name));
    let receipt = state.engine.claim_presented(&req.invite_code, owner).await?;
    info!(address = %address, code = %receipt.code, "bind request completed");

    Ok(Json(BindResponse {
        invite_code: receipt.code,
        code_type: receipt.code_type,
        bound_at: receipt.bound_at,
    }))
}

/// Issue a task code to a signing wallet that finished every quest.
pub async fn gen_invite_code(
    State(state): State<AppState>,
    payload: Result<Json<GenRequest>, JsonRejection>,
) -> ApiResult<Json<GenResponse>> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    require(&[
        ("user_address", req.user_address.as_str()),
        ("signature", req.signature.as_str()),
    ])?;
    if req.timestamp == 0 {
        return Err(ApiError::BadRequest("missing timestamp".to_string()));
    }
    if state.gate.is_none() {
        return Err(ApiError::Unavailable("task claims are disabled".to_string()));
    }

    let address = req.user_address.trim().to_ascii_lowercase();
    let message = gen_message(req.timestamp);
    verify(&state, &address, &message, &req.signature, req.timestamp).await?;

    let receipt = state.engine.claim_task(&address).await?;
    info!(address = %address, code = %receipt.code, "task code issued");

    Ok(Json(GenResponse {
        invite_code: receipt.code,
    }))
}
