//! Lingo: a self-hosted LLM translation gateway.
//!
//! Text-translation requests arrive over HTTP, pass through admission
//! control and a bounded queue, and are served by the active inference
//! provider — local weights in-process or a remote endpoint.
//!
//! # Architecture
//!
//! The pipeline is built from explicit components wired together at
//! startup:
//! - **HTTP surface**: axum router with the public and admin endpoints
//! - **Translation service**: validate → admit → generate → post-process
//! - **Model host**: the single active provider slot with atomic switching
//! - **Providers**: `mistralrs` in-process weights or a remote HTTP endpoint
//! - **Queue**: bounded in-flight and waiting lists, FIFO
//! - **Statistics**: 24-hour sliding window of per-minute counters

pub mod catalog;
pub mod config;
pub mod error;
pub mod ipguard;
pub mod langid;
pub mod languages;
pub mod model_host;
pub mod monitor;
pub mod postprocess;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod stats;

pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError, Result};
pub use server::{AppState, GatewayServer};
pub use service::{TranslationRequest, TranslationResponse, TranslationService};
