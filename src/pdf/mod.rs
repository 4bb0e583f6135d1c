//! PDF processing layer
//!
//! This module provides the document model (lopdf), first-page previews
//! (PDFium) and byte-level optimization (qpdf).

mod document;
mod editor;
mod qpdf;
mod render;

pub use document::{PageSize, PdfDocument, Rgb, StandardFont, TextOptions};
pub use editor::{LopdfDocument, LopdfFont, LopdfPage};
pub use qpdf::QpdfWrapper;
pub use render::{PageRasterizer, PdfiumRasterizer, PreviewCanvas, PREVIEW_SCALE};
