//! Holder for the most recently produced document

use crate::pdf::PdfDocument;

/// File name offered for every download
pub const DOWNLOAD_FILE_NAME: &str = "edited.pdf";

/// MIME type of every download
pub const DOWNLOAD_MIME_TYPE: &str = "application/pdf";

/// The latest result of a merge, compress, rotate or watermark.
///
/// Empty until the first operation succeeds. Each success replaces the
/// previous document wholesale.
#[derive(Debug)]
pub struct ResultStore<D> {
    current: Option<D>,
}

impl<D> Default for ResultStore<D> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<D: PdfDocument> ResultStore<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current document, returning the previous one
    pub fn set(&mut self, doc: D) -> Option<D> {
        self.current.replace(doc)
    }

    pub fn get(&self) -> Option<&D> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub fn page_count(&self) -> Option<usize> {
        self.current.as_ref().map(PdfDocument::page_count)
    }
}

/// A serialized result ready to be saved by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl Download {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            file_name: DOWNLOAD_FILE_NAME,
            mime_type: DOWNLOAD_MIME_TYPE,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
