use crate::api::CrawlerApi;
use crate::error::FetchError;
use crate::session::SessionContext;
use crawl_core::{select_preview_file, Credential, DataSnapshot, SaveFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_PREVIEW_LIMIT: usize = 10;

/// A settled load tagged with the order in which it was initiated.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub generation: u64,
    pub source: String,
    pub result: Result<DataSnapshot, FetchError>,
}

pub struct DataSnapshotLoader {
    api: Arc<dyn CrawlerApi>,
    ctx: SessionContext,
    format: SaveFormat,
    preview_limit: usize,
    generation: AtomicU64,
}

impl DataSnapshotLoader {
    pub fn new(
        api: Arc<dyn CrawlerApi>,
        ctx: SessionContext,
        format: SaveFormat,
        preview_limit: usize,
    ) -> Self {
        Self {
            api,
            ctx,
            format,
            preview_limit,
            generation: AtomicU64::new(0),
        }
    }

    /// Claims the next generation. Call at initiation time, before any await.
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Lists the source's files and previews the primary one.
    pub async fn load(&self, source: &str) -> Result<DataSnapshot, FetchError> {
        let files = self
            .api
            .list_files(&self.credential()?, source, self.format)
            .await?;
        let Some(file) = select_preview_file(&files) else {
            return Ok(DataSnapshot::empty(source));
        };
        let content = self
            .api
            .get_file_content(&self.credential()?, &file.path, self.preview_limit)
            .await?;
        Ok(DataSnapshot::from_content(
            source,
            file,
            content,
            self.preview_limit,
        ))
    }

    fn credential(&self) -> Result<Credential, FetchError> {
        self.ctx.credential().ok_or(FetchError::NotAuthenticated)
    }
}
