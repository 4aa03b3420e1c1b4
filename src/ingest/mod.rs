//! File ingestion and multimodal dispatch.
//!
//! A question arrives with one or more files. A lone PDF is rasterized page by page and sent
//! to the vision model as an ordered image sequence; anything else is registered with the
//! provider's file store and referenced from a long-context chat completion. Temporary files
//! and remote handles are released on every exit path.

mod dispatch;
pub mod render;

pub use dispatch::{DispatchAnswer, DispatchModels, DispatchRoute, FileDispatcher};
pub use render::{PageRasterizer, PdfiumRasterizer, RENDER_SCALE};
