//! API request handlers

mod claims;
mod health;
mod invite;

pub use claims::*;
pub use health::*;
pub use invite::*;
