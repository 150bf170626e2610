//! # portal-shared
//!
//! Domain vocabulary shared by the store and the HTTP server: role and status
//! enums, consent flags, invitation tokens, progress metrics, and the filename
//! heuristics used when ingesting lesson files.

pub mod classify;
pub mod constants;
pub mod invite;
pub mod metrics;
pub mod types;
