//! Document operations: merge, compress, rotate and watermark
//!
//! Each operation loads its sources into fresh documents, applies a transform
//! and hands back the finished document. Nothing here touches session state,
//! so a failure part-way through never leaves a half-edited result behind.

use crate::error::Result;
use crate::pdf::{PageSize, PdfDocument, Rgb, StandardFont, TextOptions};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Geometric factor applied by [`compress`]
pub const COMPRESS_FACTOR: f32 = 0.9;

/// Degrees added to every page by [`rotate`]
pub const ROTATION_STEP: i64 = 90;

pub const WATERMARK_FONT: StandardFont = StandardFont::HelveticaBold;
pub const WATERMARK_SIZE: f32 = 24.0;
pub const WATERMARK_COLOR: Rgb = Rgb::RED;
pub const WATERMARK_OPACITY: f32 = 0.4;
pub const DEFAULT_WATERMARK_TEXT: &str = "CONFIDENTIAL";
pub const DEFAULT_WATERMARK_POSITION: &str = "center";

/// Concatenate the pages of every input, in input order
pub fn merge<D: PdfDocument>(inputs: &[&[u8]]) -> Result<D> {
    let mut merged = D::create();
    for input in inputs {
        let source = D::load(input)?;
        let pages = merged.copy_pages(&source, &source.page_indices())?;
        for page in pages {
            merged.add_page(page)?;
        }
    }
    Ok(merged)
}

/// Shrink every page and its content to [`COMPRESS_FACTOR`] of its size.
///
/// This is a geometric scale only; embedded resources such as images are not
/// re-encoded. Byte-level size reduction is [`crate::pdf::QpdfWrapper::optimize`].
pub fn compress<D: PdfDocument>(input: &[u8]) -> Result<D> {
    let mut doc = D::load(input)?;
    for index in doc.page_indices() {
        let size = doc.page_size(index)?;
        doc.scale_content(index, COMPRESS_FACTOR)?;
        doc.set_page_size(index, size.scaled(COMPRESS_FACTOR))?;
    }
    Ok(doc)
}

/// Turn every page a quarter turn clockwise
pub fn rotate<D: PdfDocument>(input: &[u8]) -> Result<D> {
    let mut doc = D::load(input)?;
    for index in doc.page_indices() {
        let rotation = doc.rotation(index)?;
        doc.set_rotation(index, next_rotation(rotation))?;
    }
    Ok(doc)
}

/// Rotation after one [`rotate`] step, normalized to `0..360`
pub fn next_rotation(current: i64) -> i64 {
    (current + ROTATION_STEP).rem_euclid(360)
}

/// Anchor for the watermark text on each page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    Center,
    BottomRight,
}

impl WatermarkPosition {
    /// Parse free-form user input; anything unrecognized anchors top-left
    pub fn parse(input: &str) -> Self {
        match input {
            "center" => WatermarkPosition::Center,
            "bottom-right" => WatermarkPosition::BottomRight,
            _ => WatermarkPosition::TopLeft,
        }
    }

    /// Text origin on a page of `page` size for text of `text_len` characters
    /// drawn at `size` points
    pub fn origin(self, page: PageSize, text_len: usize, size: f32) -> (f32, f32) {
        let len = text_len as f32;
        match self {
            WatermarkPosition::TopLeft => (50.0, page.height - 50.0),
            WatermarkPosition::Center => (page.width / 2.0 - len * size * 0.25, page.height / 2.0),
            WatermarkPosition::BottomRight => (page.width - len * size * 0.5 - 40.0, 40.0),
        }
    }
}

/// User input for [`watermark`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkOptions {
    pub position: WatermarkPosition,
    pub text: String,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            position: WatermarkPosition::parse(DEFAULT_WATERMARK_POSITION),
            text: DEFAULT_WATERMARK_TEXT.to_string(),
        }
    }
}

/// Stamp semi-transparent text on every page
pub fn watermark<D: PdfDocument>(input: &[u8], options: &WatermarkOptions) -> Result<D> {
    let mut doc = D::load(input)?;
    let font = doc.embed_font(WATERMARK_FONT)?;
    let text_len = options.text.chars().count();

    for index in doc.page_indices() {
        let size = doc.page_size(index)?;
        let (x, y) = options.position.origin(size, text_len, WATERMARK_SIZE);
        doc.draw_text(
            index,
            &options.text,
            &TextOptions {
                x,
                y,
                size: WATERMARK_SIZE,
                font,
                color: WATERMARK_COLOR,
                opacity: WATERMARK_OPACITY,
                rotate_degrees: 0.0,
            },
        )?;
    }
    Ok(doc)
}
