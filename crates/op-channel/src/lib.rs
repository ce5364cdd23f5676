//! Shared channel adapter framework (spec §4.2). Every protocol-specific
//! binary (`channel-api`, `channel-a2a`, `channel-chat`) builds its own
//! small axum router but delegates the common plumbing — auth, body
//! limits, streaming rejection, sign-and-forward, health — to this crate.

pub mod auth;
pub mod client;
pub mod config;
pub mod health;
pub mod limits;

pub use client::{build_payload, forward, ForwardError, GuardianReply};
pub use config::ChannelConfig;
