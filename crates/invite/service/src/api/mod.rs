//! REST API

pub mod handlers;
mod router;

pub use router::create_router;
