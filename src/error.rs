//! Error types for PDF Workbench

use thiserror::Error;

/// Result type alias for PDF Workbench
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Workbench
#[derive(Error, Debug)]
pub enum Error {
    /// An action was requested before its inputs were available.
    /// The message is shown to the user verbatim.
    #[error("{message}")]
    Precondition { message: &'static str },

    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// Page out of bounds
    #[error("Page {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: usize, total: usize },

    /// Document model error
    #[error("PDF document error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Text cannot be shown with a standard font
    #[error("Text cannot be encoded with {font}: {text:?}")]
    UnencodableText { font: &'static str, text: String },

    /// Source resolution error
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Background task failed to complete
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },

    /// Download too large
    #[error("Download too large: {size} bytes (max: {max_size} bytes)")]
    DownloadTooLarge { size: u64, max_size: u64 },

    /// Preview zoom factor outside the accepted range
    #[error("Preview scale {scale} must be in (0, {max}]")]
    InvalidPreviewScale { scale: f32, max: f32 },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, file sizes) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::Precondition { message } => message.to_string(),
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of bounds (total: {})", page, total)
            }
            Error::Pdf(_) => "PDF processing error".to_string(),
            Error::UnencodableText { font, .. } => {
                format!("Watermark text contains characters not available in {}", font)
            }
            Error::SourceResolution { .. } => "Failed to resolve PDF source".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdfium { .. } => "PDF rendering error".to_string(),
            Error::Image(_) => "Image encoding error".to_string(),
            Error::QpdfError { .. } => "PDF processing error".to_string(),
            Error::Join(_) => "Internal error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }
            Error::InvalidPreviewScale { .. } => "Invalid preview scale".to_string(),
        }
    }

    /// Whether this error is a user-facing precondition notice rather than a failure
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_is_verbatim() {
        let err = Error::Precondition {
            message: "Upload a PDF first.",
        };
        assert_eq!(err.client_message(), "Upload a PDF first.");
        assert_eq!(err.to_string(), "Upload a PDF first.");
        assert!(err.is_precondition());
    }

    #[test]
    fn test_client_message_hides_paths() {
        let err = Error::PdfNotFound {
            path: "/secret/location.pdf".to_string(),
        };
        assert!(!err.client_message().contains("/secret"));
        assert!(!err.is_precondition());
    }
}
