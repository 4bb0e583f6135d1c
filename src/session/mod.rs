//! Editing session
//!
//! A [`Session`] owns the uploaded files, the latest result document and the
//! preview canvas. Every operation takes `&mut self`, so sharing a session
//! behind an async mutex runs operations strictly one after another and a
//! result is only ever replaced by a fully finished document.

mod intake;
mod store;

pub use intake::{FileCandidate, FileList, UploadedFile, PDF_MIME};
pub use store::{Download, ResultStore, DOWNLOAD_FILE_NAME, DOWNLOAD_MIME_TYPE};

use crate::error::{Error, Result};
use crate::ops::{self, WatermarkOptions};
use crate::pdf::{
    LopdfDocument, PageRasterizer, PdfDocument, PreviewCanvas, QpdfWrapper, PREVIEW_SCALE,
};
use std::sync::Arc;

pub const MERGE_NEEDS_TWO: &str = "Upload at least two PDFs to merge.";
pub const NEEDS_UPLOAD: &str = "Upload a PDF first.";
pub const NO_RESULT: &str = "No PDF generated yet.";

pub const MERGE_NOTICE: &str = "✅ Merge complete! You can now download.";
pub const COMPRESS_NOTICE: &str = "📉 Compressed! You can download it.";
pub const ROTATE_NOTICE: &str = "🔁 All pages rotated 90°.";
pub const WATERMARK_NOTICE: &str = "🖋️ Watermark added!";

/// Largest accepted preview zoom factor
pub const MAX_PREVIEW_SCALE: f32 = 10.0;

/// Pixel size of a rendered preview
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewInfo {
    pub width: u32,
    pub height: u32,
}

/// Outcome of adding files to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeOutcome {
    /// Files accepted from this batch
    pub added: usize,
    /// Files in the session after the batch
    pub total: usize,
    /// One line per file in the session
    pub status: Vec<String>,
    /// Preview of the last file, `None` if there is none or rendering failed
    pub preview: Option<PreviewInfo>,
}

/// Outcome of a successful document operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub notice: &'static str,
    pub page_count: usize,
    /// Preview of the new result, `None` if rendering failed
    pub preview: Option<PreviewInfo>,
}

/// Run PDF work off the async executor
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Single-user editing session
pub struct Session<D: PdfDocument = LopdfDocument> {
    files: FileList,
    result: ResultStore<D>,
    canvas: Option<PreviewCanvas>,
    rasterizer: Arc<dyn PageRasterizer>,
    preview_scale: f32,
}

impl<D: PdfDocument> Session<D> {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            files: FileList::new(),
            result: ResultStore::new(),
            canvas: None,
            rasterizer,
            preview_scale: PREVIEW_SCALE,
        }
    }

    /// Use a different preview zoom factor
    pub fn with_preview_scale(mut self, scale: f32) -> Result<Self> {
        if !(scale > 0.0 && scale <= MAX_PREVIEW_SCALE) {
            return Err(Error::InvalidPreviewScale {
                scale,
                max: MAX_PREVIEW_SCALE,
            });
        }
        self.preview_scale = scale;
        Ok(self)
    }

    pub fn files(&self) -> &FileList {
        &self.files
    }

    pub fn result(&self) -> &ResultStore<D> {
        &self.result
    }

    /// The most recent preview, if any has been rendered
    pub fn canvas(&self) -> Option<&PreviewCanvas> {
        self.canvas.as_ref()
    }

    pub fn preview_scale(&self) -> f32 {
        self.preview_scale
    }

    /// Add picked files, skipping any whose name and size are already present
    pub async fn add_files(&mut self, candidates: Vec<FileCandidate>) -> IntakeOutcome {
        let added = self.files.add(candidates);
        self.after_intake(added).await
    }

    /// Add dropped files. Only files typed `application/pdf` are considered.
    pub async fn drop_files(&mut self, candidates: Vec<FileCandidate>) -> IntakeOutcome {
        let added = self.files.add_dropped(candidates);
        self.after_intake(added).await
    }

    async fn after_intake(&mut self, added: usize) -> IntakeOutcome {
        tracing::info!(added, total = self.files.len(), "Files added");

        let last = self.files.last().map(|f| (f.name().to_string(), f.data()));
        let preview = match last {
            Some((name, data)) => match self.render_preview(data).await {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!(error = %e, file = %name, "Preview failed");
                    None
                }
            },
            None => None,
        };

        IntakeOutcome {
            added,
            total: self.files.len(),
            status: self.files.status_lines(),
            preview,
        }
    }

    /// Render the first page of `data` onto the canvas, replacing what was there
    pub async fn render_preview(&mut self, data: Arc<Vec<u8>>) -> Result<PreviewInfo> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let scale = self.preview_scale;
        let image = run_blocking(move || rasterizer.render_first_page(&data, scale)).await?;

        let canvas = PreviewCanvas::new(image);
        let info = PreviewInfo {
            width: canvas.width(),
            height: canvas.height(),
        };
        self.canvas = Some(canvas);
        Ok(info)
    }

    /// Concatenate every uploaded file, in upload order
    pub async fn merge(&mut self) -> Result<OperationOutcome> {
        if self.files.len() < 2 {
            return Err(Error::Precondition {
                message: MERGE_NEEDS_TWO,
            });
        }
        let inputs: Vec<Arc<Vec<u8>>> = self.files.iter().map(UploadedFile::data).collect();

        let doc = run_blocking(move || {
            let slices: Vec<&[u8]> = inputs.iter().map(|d| d.as_slice()).collect();
            ops::merge::<D>(&slices)
        })
        .await?;
        self.publish(doc, MERGE_NOTICE).await
    }

    /// Shrink the pages of the first uploaded file
    pub async fn compress(&mut self) -> Result<OperationOutcome> {
        let input = self.first_file()?;
        let doc = run_blocking(move || ops::compress::<D>(&input)).await?;
        self.publish(doc, COMPRESS_NOTICE).await
    }

    /// Rotate every page of the first uploaded file
    pub async fn rotate(&mut self) -> Result<OperationOutcome> {
        let input = self.first_file()?;
        let doc = run_blocking(move || ops::rotate::<D>(&input)).await?;
        self.publish(doc, ROTATE_NOTICE).await
    }

    /// Stamp text on every page of the first uploaded file
    pub async fn watermark(&mut self, options: WatermarkOptions) -> Result<OperationOutcome> {
        let input = self.first_file()?;
        let doc = run_blocking(move || ops::watermark::<D>(&input, &options)).await?;
        self.publish(doc, WATERMARK_NOTICE).await
    }

    /// Serialize the current result. With `optimize`, the bytes are also
    /// rewritten by qpdf to reduce their size.
    pub async fn download(&mut self, optimize: bool) -> Result<Download> {
        let mut snapshot = self
            .result
            .get()
            .cloned()
            .ok_or(Error::Precondition { message: NO_RESULT })?;

        let data = run_blocking(move || snapshot.save()).await?;
        let data = if optimize {
            run_blocking(move || QpdfWrapper::optimize(&data)).await?
        } else {
            data
        };

        tracing::info!(bytes = data.len(), optimize, "Prepared download");
        Ok(Download::new(data))
    }

    fn first_file(&self) -> Result<Arc<Vec<u8>>> {
        self.files
            .first()
            .map(UploadedFile::data)
            .ok_or(Error::Precondition {
                message: NEEDS_UPLOAD,
            })
    }

    /// Serialize a finished document, store it as the result and preview it
    async fn publish(&mut self, doc: D, notice: &'static str) -> Result<OperationOutcome> {
        let (doc, bytes) = run_blocking(move || {
            let mut doc = doc;
            let bytes = doc.save()?;
            Ok((doc, bytes))
        })
        .await?;

        let page_count = doc.page_count();
        self.result.set(doc);
        tracing::info!(page_count, notice, "Result updated");

        let preview = match self.render_preview(Arc::new(bytes)).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "Preview of result failed");
                None
            }
        };

        Ok(OperationOutcome {
            notice,
            page_count,
            preview,
        })
    }
}
