//! Product video ad engine
//!
//! Accepts a product image with metadata, runs it through a staged
//! generation pipeline on a recycling worker pool, and exposes per-job
//! progress, downloadable per-format videos and an optional ad submission.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod testing;
