//! Embedded storage layer.
//!
//! A single redb database holds every entity as JSON-serialized rows with
//! composite-key secondary indexes where ordered scans are needed. Entity
//! accessors are grouped per module as `impl Store` blocks.

pub mod db;
mod devices;
mod ech_keys;
mod tunnels;
mod users;
mod wallet;

pub use db::{Store, StoreError, StoreResult};
