//! Ingestion pipeline: duplicate check, structured extraction, row write and
//! reply, plus the key-gated table export.

use std::sync::Arc;

use anyhow::Result;
use evcal_adapters::{NoopNotifier, ReplyNotifier};
use evcal_core::SystemClock;

pub mod config;
pub mod dedup;
pub mod export;
pub mod pipeline;
pub mod writer;

pub use config::{IngestConfig, StoreBackend, DEFAULT_SHEET_NAME};
pub use export::{export_rows, read_api, ExportRecord, ExportResponse, UNAUTHORIZED_MESSAGE};
pub use pipeline::{
    confirmation_text, IngestFailure, IngestOutcome, IngestPipeline, DUPLICATE_NOTICE,
};

pub const CRATE_NAME: &str = "evcal-ingest";

/// Pipeline wired to the configured store, extractor and LINE replies.
pub fn build_pipeline(config: &IngestConfig) -> Result<IngestPipeline> {
    build_pipeline_with_notifier(config, config.build_notifier()?)
}

/// Pipeline whose replies are only logged.
pub fn build_offline_pipeline(config: &IngestConfig) -> Result<IngestPipeline> {
    build_pipeline_with_notifier(config, Arc::new(NoopNotifier))
}

fn build_pipeline_with_notifier(
    config: &IngestConfig,
    notifier: Arc<dyn ReplyNotifier>,
) -> Result<IngestPipeline> {
    Ok(IngestPipeline::new(
        config.build_store()?,
        config.build_extractor(Arc::new(SystemClock))?,
        notifier,
    ))
}
