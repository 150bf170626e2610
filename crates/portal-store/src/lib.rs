//! # portal-store
//!
//! Persistent storage for the tutoring portal, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model.  Records that can be edited concurrently carry a `version` column;
//! writes against a stale version fail with [`StoreError::Conflict`].

pub mod database;
pub mod files;
pub mod homework;
pub mod invitations;
pub mod lessons;
pub mod migrations;
pub mod models;
pub mod progress;
pub mod subscriptions;
pub mod tutors;
pub mod users;
pub mod views;

mod codec;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
