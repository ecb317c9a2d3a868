//! HTTP service around `invite-core`: configuration, REST API, quest
//! provider client, droplet ticker and the bulk bind command.

pub mod api;
pub mod config;
pub mod error;
pub mod import;
pub mod server;
pub mod signature;
pub mod state;
pub mod ticker;
pub mod zealy;

pub use api::create_router;
pub use config::ServiceConfig;
pub use error::{ApiError, ApiResult, ServiceError, ServiceResult};
pub use server::Server;
pub use signature::{SignatureGate, SignatureVerifier, TrustUpstreamVerifier};
pub use state::AppState;
pub use ticker::DropletTicker;
pub use zealy::ZealyClient;
