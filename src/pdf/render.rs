//! First-page preview rendering

use crate::error::{Error, Result};
use base64::Engine;
use image::RgbaImage;
use pdfium_render::prelude::*;

/// Zoom factor applied to the first page for on-screen preview
pub const PREVIEW_SCALE: f32 = 1.2;

/// Rasterizes the first page of a serialized PDF
pub trait PageRasterizer: Send + Sync {
    fn render_first_page(&self, data: &[u8], scale: f32) -> Result<RgbaImage>;
}

/// Create a PDFium instance, preferring a library shipped next to the binary
fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to load PDFium library: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// [`PageRasterizer`] backed by the PDFium shared library
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PageRasterizer for PdfiumRasterizer {
    fn render_first_page(&self, data: &[u8], scale: f32) -> Result<RgbaImage> {
        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(|e| Error::Pdfium {
                reason: format!("{}", e),
            })?;

        let page = document.pages().get(0).map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page 1: {}", e),
        })?;

        let config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to render page 1: {}", e),
            })?;

        Ok(bitmap.as_image().to_rgba8())
    }
}

/// Drawing surface holding the most recent preview.
///
/// The canvas always has exactly the pixel size of the last rendered page.
#[derive(Debug, Clone)]
pub struct PreviewCanvas {
    image: RgbaImage,
}

impl PreviewCanvas {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode the canvas as PNG
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut png_bytes = Vec::new();
        self.image.write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )?;
        Ok(png_bytes)
    }

    pub fn to_png_base64(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_png()?))
    }
}
