//! qpdf FFI wrapper for byte-level PDF optimization
//!
//! Geometry edits go through [`crate::pdf::PdfDocument`]; qpdf only rewrites
//! the serialized file to make it smaller.

use crate::error::{Error, Result};
use qpdf::{ObjectStreamMode, QPdf};

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    Error::QpdfError {
        reason: e.to_string(),
    }
}

impl QpdfWrapper {
    /// Shrink a serialized PDF by packing objects into object streams,
    /// compressing streams and dropping unreferenced objects
    ///
    /// # Arguments
    /// * `input_data` - Raw PDF bytes
    ///
    /// # Returns
    /// The optimized PDF as bytes
    pub fn optimize(input_data: &[u8]) -> Result<Vec<u8>> {
        let qpdf = QPdf::read_from_memory(input_data).map_err(map_qpdf_error)?;

        let mut writer = qpdf.writer();
        writer
            .object_stream_mode(ObjectStreamMode::Generate)
            .compress_streams(true)
            .normalize_content(true)
            .preserve_unreferenced_objects(false)
            .preserve_encryption(false);
        writer.write_to_memory().map_err(map_qpdf_error)
    }
}
