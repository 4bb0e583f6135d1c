//! Document capability used by the editing operations
//!
//! Operations never touch a concrete PDF library directly. They drive a
//! [`PdfDocument`], which exposes the handful of primitives the editor needs:
//! load, create, copy pages between documents, read and change page geometry,
//! embed a standard font, draw text and serialize.

use crate::error::Result;

/// Page dimensions in PDF user-space units (points)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// US Letter, used when a page declares no MediaBox
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    pub fn scaled(self, factor: f32) -> Self {
        Self {
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// RGB color with components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const RED: Rgb = Rgb::new(1.0, 0.0, 0.0);
}

/// The 14 standard Type 1 fonts every PDF reader provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFont {
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Symbol,
    ZapfDingbats,
}

impl StandardFont {
    /// PostScript name written to the font dictionary's `BaseFont`
    pub fn base_font(self) -> &'static str {
        match self {
            StandardFont::Courier => "Courier",
            StandardFont::CourierBold => "Courier-Bold",
            StandardFont::CourierOblique => "Courier-Oblique",
            StandardFont::CourierBoldOblique => "Courier-BoldOblique",
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
            StandardFont::HelveticaOblique => "Helvetica-Oblique",
            StandardFont::HelveticaBoldOblique => "Helvetica-BoldOblique",
            StandardFont::TimesRoman => "Times-Roman",
            StandardFont::TimesBold => "Times-Bold",
            StandardFont::TimesItalic => "Times-Italic",
            StandardFont::TimesBoldItalic => "Times-BoldItalic",
            StandardFont::Symbol => "Symbol",
            StandardFont::ZapfDingbats => "ZapfDingbats",
        }
    }

    /// Symbolic fonts carry their own built-in encoding
    pub fn is_symbolic(self) -> bool {
        matches!(self, StandardFont::Symbol | StandardFont::ZapfDingbats)
    }
}

/// Drawing parameters for [`PdfDocument::draw_text`]
#[derive(Debug, Clone, Copy)]
pub struct TextOptions<F> {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub font: F,
    pub color: Rgb,
    /// Fill opacity, `0.0` transparent to `1.0` opaque
    pub opacity: f32,
    /// Counter-clockwise text rotation in degrees
    pub rotate_degrees: f32,
}

/// A mutable in-memory PDF document with an ordered sequence of pages.
///
/// Page indices are 0-based positions in the document's page order.
pub trait PdfDocument: Clone + Send + 'static {
    /// Handle to a page copied into this document but not yet placed
    type Page: Copy + Send + std::fmt::Debug;
    /// Handle to a font embedded in this document
    type Font: Copy + Send + std::fmt::Debug;

    /// Create an empty document with no pages
    fn create() -> Self;

    /// Parse a document from its serialized bytes
    fn load(bytes: &[u8]) -> Result<Self>;

    fn page_count(&self) -> usize;

    /// All page indices in document order
    fn page_indices(&self) -> Vec<usize> {
        (0..self.page_count()).collect()
    }

    /// Copy pages of `source` into this document. The copies are returned in
    /// the order of `indices` and are not visible until passed to [`add_page`].
    ///
    /// [`add_page`]: PdfDocument::add_page
    fn copy_pages(&mut self, source: &Self, indices: &[usize]) -> Result<Vec<Self::Page>>;

    /// Append a copied page to the end of the page sequence
    fn add_page(&mut self, page: Self::Page) -> Result<()>;

    fn page_size(&self, index: usize) -> Result<PageSize>;

    fn set_page_size(&mut self, index: usize, size: PageSize) -> Result<()>;

    /// Page rotation in degrees as stored in the document
    fn rotation(&self, index: usize) -> Result<i64>;

    fn set_rotation(&mut self, index: usize, degrees: i64) -> Result<()>;

    /// Scale everything drawn on the page about the origin
    fn scale_content(&mut self, index: usize, factor: f32) -> Result<()>;

    fn embed_font(&mut self, font: StandardFont) -> Result<Self::Font>;

    fn draw_text(&mut self, index: usize, text: &str, options: &TextOptions<Self::Font>)
        -> Result<()>;

    /// Serialize the document
    fn save(&mut self) -> Result<Vec<u8>>;
}
