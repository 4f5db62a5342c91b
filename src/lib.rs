//! Local-first persistence for site records: a quota-bounded cache, a remote-first
//! client that falls back to it, and migration of inline annotation assets to
//! object storage.

pub mod assets;
pub mod error;
pub mod fallback;
pub mod migration;
pub mod remote;
pub mod resources;
pub mod store;
pub mod upload;
