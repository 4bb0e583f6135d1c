//! PDF Workbench Library
//!
//! This crate provides an MCP server holding a single PDF editing session:
//! - `add_files` / `drop_files`: Upload PDFs (deduplicated by name and size)
//! - `merge_pdfs`: Concatenate every uploaded PDF
//! - `compress_pdf`, `rotate_pdf`, `watermark_pdf`: Transform the first upload
//! - `download_pdf`: Serialize the latest result as `edited.pdf`
//! - `get_preview`: First page of the latest file or result as PNG

pub mod error;
pub mod ops;
pub mod pdf;
pub mod server;
pub mod session;
pub mod source;

pub use error::{Error, Result};
pub use ops::{WatermarkOptions, WatermarkPosition};
pub use server::{
    run_server_with_config, ListPdfsParams, ListPdfsResult, PdfFileInfo, PdfServer, PdfSource,
    ServerConfig,
};
pub use session::{Download, FileCandidate, OperationOutcome, Session};
