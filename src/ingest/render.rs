//! PDF rasterization.
//!
//! Rendering is CPU-bound and pdfium is not async-safe, so callers run
//! [`PageRasterizer::rasterize`] inside `spawn_blocking`.

use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::llm::LlmError;

/// Upscaling factor applied to both axes: 96 DPI output from the 72 DPI page baseline.
pub const RENDER_SCALE: f32 = 96.0 / 72.0;

/// Renders every page of a PDF into an image file.
pub trait PageRasterizer: Send + Sync {
    /// Render each page of `pdf` into `out_dir`, returning the image paths in page order.
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, LlmError>;
}

/// File name of the rendered image for a zero-based page index.
pub fn page_file_name(index: usize) -> String {
    format!("page-{:04}.png", index + 1)
}

/// Pdfium-backed rasterizer.
///
/// Binds to a pdfium library next to the executable first, then to the system library.
pub struct PdfiumRasterizer {
    scale: f32,
    // pdfium keeps global library state; one document at a time.
    lock: Mutex<()>,
}

impl PdfiumRasterizer {
    /// Create a rasterizer using [`RENDER_SCALE`].
    pub fn new() -> Self {
        Self {
            scale: RENDER_SCALE,
            lock: Mutex::new(()),
        }
    }

    fn bind() -> Result<Pdfium, LlmError> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|error| LlmError::Render(format!("pdfium library unavailable: {error}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, LlmError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| LlmError::Render("pdfium lock poisoned".into()))?;

        let pdfium = Self::bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|error| LlmError::Render(format!("failed to open PDF: {error}")))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.scale)
            .rotate(PdfPageRenderRotation::None, false);

        let mut pages = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let image = page
                .render_with_config(&render_config)
                .map_err(|error| {
                    LlmError::Render(format!("failed to render page {}: {error}", index + 1))
                })?
                .as_image();
            let path = out_dir.join(page_file_name(index));
            image
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|error| {
                    LlmError::Render(format!("failed to write page {}: {error}", index + 1))
                })?;
            pages.push(path);
        }

        tracing::debug!(pdf = %pdf.display(), pages = pages.len(), "Rasterized PDF");
        Ok(pages)
    }
}
