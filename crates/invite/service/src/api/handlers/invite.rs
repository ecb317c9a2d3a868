//! Read-only invite endpoints

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use invite_core::{CodeType, DropletSummary, QuestTask, RotationEntry, SelectionMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub description: String,
}

impl From<QuestTask> for TaskView {
    fn from(task: QuestTask) -> Self {
        Self {
            id: task.id,
            description: task.name,
        }
    }
}

fn task_views(tasks: Vec<QuestTask>) -> Vec<TaskView> {
    tasks.into_iter().map(TaskView::from).collect()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub total_codes: u64,
    pub remaining_codes: u64,
    pub total_task_codes: u64,
    pub remaining_task_codes: u64,
    pub tasks: Vec<TaskView>,
}

async fn published_tasks(state: &AppState) -> ApiResult<Vec<TaskView>> {
    match &state.gate {
        Some(gate) => Ok(task_views(gate.required_tasks().await?)),
        None => Ok(Vec::new()),
    }
}

pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<SummaryResponse>> {
    let tasks = published_tasks(&state).await?;
    let totals = state.stats.totals().await?;
    let task_stats = state.stats.stats(CodeType::Task).await?;

    Ok(Json(SummaryResponse {
        total_codes: totals.total,
        remaining_codes: totals.remaining,
        total_task_codes: task_stats.total,
        remaining_task_codes: task_stats.remaining,
        tasks,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TasksResponse {
    pub tasks: Vec<TaskView>,
}

pub async fn tasks(State(state): State<AppState>) -> ApiResult<Json<TasksResponse>> {
    Ok(Json(TasksResponse {
        tasks: published_tasks(&state).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UserStatusQuery {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserStatusResponse {
    pub bound: bool,
    /// Empty when the wallet owns no code.
    pub invite_code: String,
    pub tasks: Vec<TaskView>,
}

pub async fn user_status(
    State(state): State<AppState>,
    Query(query): Query<UserStatusQuery>,
) -> ApiResult<Json<UserStatusResponse>> {
    let address = query.address.unwrap_or_default();
    let status = state.engine.user_status(&address).await?;

    Ok(Json(UserStatusResponse {
        bound: status.bound,
        invite_code: status.invite_code.unwrap_or_default(),
        tasks: task_views(status.tasks),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DropletsQuery {
    #[serde(default)]
    pub droplet: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DropletView {
    pub total_count: u64,
    pub available_count: u64,
    pub round: u32,
    pub invite_code: String,
}

impl From<DropletSummary> for DropletView {
    fn from(summary: DropletSummary) -> Self {
        Self {
            total_count: summary.total_count,
            available_count: summary.available_count,
            round: summary.round,
            invite_code: summary.invite_code.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DropletsResponse {
    pub droplets: Vec<DropletView>,
}

pub async fn droplets(
    State(state): State<AppState>,
    Query(query): Query<DropletsQuery>,
) -> ApiResult<Json<DropletsResponse>> {
    let mode = SelectionMode::from_query(query.droplet.as_deref());
    let sample = state.sampler.sample(mode).await?;

    Ok(Json(DropletsResponse {
        droplets: sample.into_iter().map(DropletView::from).collect(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WaterCodeView {
    pub invite_code: String,
    pub used: bool,
}

impl From<RotationEntry> for WaterCodeView {
    fn from(entry: RotationEntry) -> Self {
        Self {
            invite_code: entry.code,
            used: entry.used,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WaterInviteCodeResponse {
    pub invite_codes: Vec<WaterCodeView>,
}

pub async fn water_invite_code(
    State(state): State<AppState>,
) -> ApiResult<Json<WaterInviteCodeResponse>> {
    let entries = state.water.current().await?;
    Ok(Json(WaterInviteCodeResponse {
        invite_codes: entries.into_iter().map(WaterCodeView::from).collect(),
    }))
}
