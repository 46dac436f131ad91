//! Shared application state.

use std::sync::Arc;

use chrono::Duration;
use domain::{
    DocumentService, DocumentSettings, FsSnapshotStorage, HtmlPassthroughRenderer,
    HttpPdfRenderer, InMemorySnapshotStorage, PdfRenderer, PipelineService, SalesService,
    SnapshotStorage,
};
use store::Store;

use crate::config::Config;

/// Services shared by every handler.
pub struct AppState<S> {
    pub pipeline: PipelineService<S>,
    pub sales: SalesService<S>,
    pub documents: DocumentService<S>,
}

impl<S: Store> AppState<S> {
    pub fn new(
        store: S,
        renderer: Arc<dyn PdfRenderer>,
        snapshots: Arc<dyn SnapshotStorage>,
        config: &Config,
    ) -> Self {
        let settings = DocumentSettings {
            token_ttl: Duration::days(config.signing_token_ttl_days),
        };
        Self {
            pipeline: PipelineService::new(store.clone(), config.default_currency.clone()),
            sales: SalesService::new(
                store.clone(),
                renderer.clone(),
                config.default_currency.clone(),
            ),
            documents: DocumentService::new(store, renderer, snapshots, settings),
        }
    }

    /// Builds the state with the renderer and snapshot storage the config
    /// asks for.
    pub fn from_config(store: S, config: &Config) -> Self {
        let renderer: Arc<dyn PdfRenderer> = match &config.pdf_renderer_url {
            Some(url) => {
                tracing::info!(%url, "rendering PDFs through external service");
                Arc::new(HttpPdfRenderer::new(url.clone()))
            }
            None => {
                tracing::warn!("PDF_RENDERER_URL not set, documents are served as HTML");
                Arc::new(HtmlPassthroughRenderer)
            }
        };
        let snapshots: Arc<dyn SnapshotStorage> = match &config.snapshot_dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "storing snapshots on disk");
                Arc::new(FsSnapshotStorage::new(dir.clone()))
            }
            None => {
                tracing::warn!("SNAPSHOT_DIR not set, snapshots are kept in memory");
                Arc::new(InMemorySnapshotStorage::new())
            }
        };
        Self::new(store, renderer, snapshots, config)
    }
}
