//! FilterSync Server - Reference filter backend.
//!
//! This crate serves the HTTP contract the FilterSync engine's HTTP backend
//! consumes:
//! - Ordered filter catalogs per application
//! - A stored count per filter
//! - Published notifications, streamed to subscribers as NDJSON
//!
//! # Architecture
//!
//! State lives in memory only. A [`registry::Registry`] holds catalogs and
//! counts, and a [`broadcast::NotificationHub`] fans notifications out to
//! every open stream of the same application.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod registry;
pub mod routes;
