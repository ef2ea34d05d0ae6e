//! Credentials Manager core: the request/response protocol, the
//! envelope-encryption-backed credential store glue, and live password
//! rotation (§1, §2).
//!
//! This crate hosts the pieces that sit above [`cm_crypto`] and
//! [`cm_store`]: [`context::ServerContext`] (the explicit, immutable
//! process state that replaces the reference's import-time globals),
//! [`auth`] (§4.4), [`protocol`] (§4.6), and [`rotator`] (§4.5). The
//! mTLS listener itself lives in the separate `cm-server` crate, which
//! depends on this one.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod rotator;

pub use context::ServerContext;
pub use error::RequestError;
