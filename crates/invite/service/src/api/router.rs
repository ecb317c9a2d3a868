//! API Router configuration

use super::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let invite_routes = Router::new()
        .route("/summary", get(handlers::summary))
        .route("/tasks", get(handlers::tasks))
        .route("/userStatus", get(handlers::user_status))
        .route("/droplets", get(handlers::droplets))
        .route("/waterInviteCode", get(handlers::water_invite_code))
        .route("/bind", post(handlers::bind))
        .route("/genInviteCode", post(handlers::gen_invite_code));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/invite", invite_routes);

    let enable_cors = state.config.server.enable_cors;
    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{
        BindResponse, DropletsResponse, GenResponse, SummaryResponse, UserStatusResponse,
        WaterInviteCodeResponse,
    };
    use crate::config::ServiceConfig;
    use crate::error::ErrorResponse;
    use crate::signature::TrustUpstreamVerifier;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use invite_core::{
        CodeStore, CodeType, InMemoryInviteStore, InviteResult, InviteStorage, QuestMember,
        QuestProvider, QuestTask,
    };
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct StaticQuests;

    fn quest(id: &str) -> QuestTask {
        QuestTask {
            id: id.to_string(),
            name: format!("Quest {id}"),
        }
    }

    #[async_trait]
    impl QuestProvider for StaticQuests {
        async fn list_tasks(&self) -> InviteResult<Vec<QuestTask>> {
            Ok(vec![quest("q1"), quest("q2")])
        }

        async fn find_member(&self, wallet: &str) -> InviteResult<Option<QuestMember>> {
            Ok(match wallet {
                "0xdone" => Some(QuestMember {
                    id: "member-done".to_string(),
                    discord_id: Some("d-done".to_string()),
                    discord_handle: Some("done".to_string()),
                }),
                "0xhalf" => Some(QuestMember {
                    id: "member-half".to_string(),
                    discord_id: Some("d-half".to_string()),
                    discord_handle: None,
                }),
                _ => None,
            })
        }

        async fn list_completed_tasks(&self, member_id: &str) -> InviteResult<Vec<QuestTask>> {
            Ok(match member_id {
                "member-done" => vec![quest("q1"), quest("q2")],
                "member-half" => vec![quest("q1")],
                _ => Vec::new(),
            })
        }
    }

    async fn app(with_quests: bool) -> (Router, Arc<InMemoryInviteStore>) {
        let store = Arc::new(InMemoryInviteStore::new());
        let seed = [
            ("DIRECT01", CodeType::Direct),
            ("DIRECT02", CodeType::Direct),
            ("TASKCODE", CodeType::Task),
            ("WATER001", CodeType::Water),
            ("WATER002", CodeType::Water),
        ];
        for (code, code_type) in seed {
            store.create_code(code, code_type, Utc::now()).await.unwrap();
        }

        let provider: Option<Arc<dyn QuestProvider>> = if with_quests {
            Some(Arc::new(StaticQuests))
        } else {
            None
        };
        let mut config = ServiceConfig::default();
        config.droplets.droplet_count = 2;
        config.droplets.codes_per_droplet = 1;

        let shared: Arc<dyn InviteStorage> = store.clone();
        let state = AppState::assemble(config, shared, provider, Arc::new(TrustUpstreamVerifier))
            .unwrap();
        state.scheduler.advance().await.unwrap();
        (create_router(state), store)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str, payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    fn bind_payload(address: &str, code: &str) -> serde_json::Value {
        serde_json::json!({
            "user_address": address,
            "discord_id": format!("discord-{address}"),
            "discord_name": "someone",
            "invite_code": code,
            "signature": "0xsigned",
            "timestamp": Utc::now().timestamp(),
        })
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let (app, _) = app(false).await;
        let (status, body) = send(&app, get_req("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = parse(&body);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["task_claims"], false);
    }

    #[tokio::test]
    async fn bind_then_conflicts() {
        let (app, store) = app(false).await;

        let (status, body) = send(
            &app,
            post_req("/api/v1/invite/bind", bind_payload("0xAAA", "DIRECT01")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let receipt: BindResponse = parse(&body);
        assert_eq!(receipt.invite_code, "DIRECT01");
        assert_eq!(receipt.code_type, CodeType::Direct);

        let stored = store.find_by_code("DIRECT01").await.unwrap().unwrap();
        let owner = stored.owner.unwrap();
        assert_eq!(owner.wallet_address.as_deref(), Some("0xaaa"));
        assert_eq!(owner.discord_name.as_deref(), Some("someone"));

        let (status, body) = send(
            &app,
            post_req("/api/v1/invite/bind", bind_payload("0xBBB", "DIRECT01")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse::<ErrorResponse>(&body).code, "CODE_ALREADY_BOUND");

        let (status, body) = send(
            &app,
            post_req("/api/v1/invite/bind", bind_payload("0xaaa", "DIRECT02")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse::<ErrorResponse>(&body).code, "USER_ALREADY_BOUND");

        let (status, body) = send(&app, get_req("/api/v1/invite/userStatus?address=0xAAA")).await;
        assert_eq!(status, StatusCode::OK);
        let user: UserStatusResponse = parse(&body);
        assert!(user.bound);
        assert_eq!(user.invite_code, "DIRECT01");
    }

    #[tokio::test]
    async fn bind_rejects_bad_input() {
        let (app, _) = app(false).await;

        let mut payload = bind_payload("0xAAA", "DIRECT01");
        payload["discord_name"] = serde_json::json!("");
        let (status, body) = send(&app, post_req("/api/v1/invite/bind", payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse::<ErrorResponse>(&body).code, "INVALID_PARAMS");

        let mut payload = bind_payload("0xAAA", "DIRECT01");
        payload["timestamp"] = serde_json::json!(Utc::now().timestamp() - 3600);
        let (status, _) = send(&app, post_req("/api/v1/invite/bind", payload)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            post_req("/api/v1/invite/bind", bind_payload("0xAAA", "TASKCODE")),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            post_req("/api/v1/invite/bind", bind_payload("0xAAA", "MISSING0")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/invite/bind")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn gen_invite_code_follows_quest_progress() {
        let (app, _) = app(true).await;
        let now = Utc::now().timestamp();

        let (status, body) = send(
            &app,
            post_req(
                "/api/v1/invite/genInviteCode",
                serde_json::json!({"user_address": "0xHALF", "signature": "0xs", "timestamp": now}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(parse::<ErrorResponse>(&body).code, "TASKS_INCOMPLETE");

        let (status, body) = send(
            &app,
            post_req(
                "/api/v1/invite/genInviteCode",
                serde_json::json!({"user_address": "0xDONE", "signature": "0xs", "timestamp": now}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<GenResponse>(&body).invite_code, "TASKCODE");

        let (status, body) = send(&app, get_req("/api/v1/invite/summary")).await;
        assert_eq!(status, StatusCode::OK);
        let summary: SummaryResponse = parse(&body);
        assert_eq!(summary.total_codes, 5);
        assert_eq!(summary.remaining_codes, 4);
        assert_eq!(summary.total_task_codes, 1);
        assert_eq!(summary.remaining_task_codes, 0);
        assert_eq!(summary.tasks.len(), 2);
        assert_eq!(summary.tasks[0].description, "Quest q1");
    }

    #[tokio::test]
    async fn gen_invite_code_without_provider_is_unavailable() {
        let (app, _) = app(false).await;
        let (status, _) = send(
            &app,
            post_req(
                "/api/v1/invite/genInviteCode",
                serde_json::json!({
                    "user_address": "0xdone",
                    "signature": "0xs",
                    "timestamp": Utc::now().timestamp()
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn public_views_of_water_codes() {
        let (app, _) = app(false).await;

        let (status, body) = send(&app, get_req("/api/v1/invite/droplets?droplet=sp")).await;
        assert_eq!(status, StatusCode::OK);
        let droplets: DropletsResponse = parse(&body);
        // Two droplets exist, fewer than three are shown in full.
        assert_eq!(droplets.droplets.len(), 2);
        for droplet in &droplets.droplets {
            assert_eq!(droplet.round, 0);
            assert_eq!(droplet.total_count, 1);
            assert_eq!(droplet.available_count, 1);
        }

        let (status, body) = send(&app, get_req("/api/v1/invite/waterInviteCode")).await;
        assert_eq!(status, StatusCode::OK);
        let water: WaterInviteCodeResponse = parse(&body);
        assert_eq!(water.invite_codes.len(), 2);
        assert!(water.invite_codes.iter().all(|code| !code.used));
    }

    #[tokio::test]
    async fn unknown_wallet_status_is_empty() {
        let (app, _) = app(true).await;
        let (status, body) = send(&app, get_req("/api/v1/invite/userStatus")).await;
        assert_eq!(status, StatusCode::OK);
        let user: UserStatusResponse = parse(&body);
        assert!(!user.bound);
        assert!(user.invite_code.is_empty());
        assert!(user.tasks.is_empty());
    }
}
