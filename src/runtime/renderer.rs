//! Renderer attachment
//!
//! When a coroutine finishes its first run, the instance tells the renderer
//! to load the produced page using the page parameters the coroutine was
//! created with. The renderer protocol itself lives outside this crate; the
//! trait here is the seam, and the default implementation does nothing.

use crate::runtime::coroutine::CoroutineId;
use crate::runtime::error::{TransportError, TransportResult};
use crate::runtime::message::{PageParams, PageType};
use tracing::debug;

/// Connection to a page renderer.
pub trait RendererLink: Send + Sync {
    /// Announce a coroutine's page after its first completed run.
    fn page_load(&self, cid: CoroutineId, page: &PageParams) -> TransportResult<()>;
}

/// Renderer that accepts everything and displays nothing.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl RendererLink for NullRenderer {
    fn page_load(&self, cid: CoroutineId, page: &PageParams) -> TransportResult<()> {
        if page.page_type != PageType::Null {
            debug!(%cid, ?page.page_type, "no renderer attached, page discarded");
        }
        Ok(())
    }
}

/// Renderer stub that refuses pages, for exercising failure paths in tests.
#[derive(Debug, Default)]
pub struct RejectingRenderer;

impl RendererLink for RejectingRenderer {
    fn page_load(&self, _cid: CoroutineId, _page: &PageParams) -> TransportResult<()> {
        Err(TransportError::ChannelClosed)
    }
}
