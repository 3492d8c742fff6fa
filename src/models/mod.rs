//! Core data models for the object lifecycle service.
//!
//! Records and collections live in the Active Store, trash entries in the
//! Trash Store. All of them map to SQLite rows via `sqlx::FromRow` and
//! serialize as JSON via `serde`.

pub mod collection;
pub mod ident;
pub mod quota;
pub mod record;
pub mod trash;
