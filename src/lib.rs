//! Kaitu Center - Tunnel Control-Plane Service
//!
//! This crate is the control plane (the "center") for the Kaitu tunnel
//! network. It authenticates end-user devices and relay ("slave") nodes,
//! manages the lifecycle of Encrypted Client Hello (ECH) key material used
//! by front-door relays, and serves the routing directory that maps logical
//! tunnel protocols to concrete relay endpoints.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Tokens, verification codes, request authentication
//! - `ech` - ECH key material: wire codec, at-rest envelope, rotation
//! - `storage` - Embedded database (redb) and entity accessors

pub mod alert;
pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod ech;
pub mod error;
pub mod models;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
