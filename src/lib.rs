//! Virtual fitting service.
//!
//! Accepts up to three garments per request, composites them one at a time
//! onto the caller's photo in a background job, and exposes the job's
//! progress and outcome for polling.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
