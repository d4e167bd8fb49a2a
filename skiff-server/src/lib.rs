//! Local web console for an Ollama daemon.
//!
//! The server sits between a browser dashboard and `ollama serve` on the
//! same machine.  Management calls (`/api/status`, `/api/models`, session
//! CRUD) are plain JSON; the two long-running operations, model pulls and
//! chat replies, are relayed as NDJSON streams so the dashboard renders
//! progress and tokens as they happen.  Chat transcripts are persisted to
//! SQLite, including partial replies from streams that died halfway.
//!
//! Module map:
//! - [`stream`]: frame decoding, the relay loop, turn accumulation
//! - [`ollama`]: HTTP client for the daemon
//! - [`db`]: store traits and the SQLite implementation
//! - [`routes`] / [`schemas`] / [`middleware`]: the Axum surface
//! - [`config`] / [`state`] / [`error`]: the usual plumbing

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod ollama;
pub mod routes;
pub mod schemas;
pub mod state;
pub mod stream;
