//! MCP Server implementation using rmcp

use crate::ops::{
    WatermarkOptions, WatermarkPosition, DEFAULT_WATERMARK_POSITION, DEFAULT_WATERMARK_TEXT,
};
use crate::pdf::{PageRasterizer, PdfiumRasterizer, PREVIEW_SCALE};
use crate::session::{
    FileCandidate, FileList, IntakeOutcome, OperationOutcome, PreviewInfo, Session,
    DOWNLOAD_FILE_NAME,
};
use crate::source::{resolve_base64, resolve_path, resolve_url, ResolvedPdf};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Upload source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
        /// Name to list the file under (default: the file name)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// MIME type (default: guessed from the name)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Base64 encoded file data
    Base64 {
        /// Base64 encoded content
        base64: String,
        /// Name to list the file under (default: "upload.pdf")
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// MIME type (default: guessed from the name)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// URL to download the file from
    Url {
        /// URL of the file
        url: String,
        /// Name to list the file under (default: last URL path segment)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// MIME type (default: the response Content-Type)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

fn optional_string<E: serde::de::Error>(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> std::result::Result<Option<String>, E> {
    match obj.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(E::custom(format!("\"{}\" must be a string", key))),
    }
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            return Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with one of \"path\", \"base64\" or \"url\", but got {}",
                match &value {
                    serde_json::Value::Array(_) => "an array",
                    serde_json::Value::String(_) => "a string",
                    serde_json::Value::Number(_) => "a number",
                    serde_json::Value::Bool(_) => "a boolean",
                    serde_json::Value::Null => "null",
                    _ => "unknown type",
                }
            )));
        };

        let name = optional_string(obj, "name")?;
        let mime_type = optional_string(obj, "mime_type")?;

        if obj.contains_key("path") {
            let path = optional_string(obj, "path")?
                .ok_or_else(|| serde::de::Error::custom("\"path\" must be a string"))?;
            return Ok(PdfSource::Path {
                path,
                name,
                mime_type,
            });
        }
        if obj.contains_key("base64") {
            let base64 = optional_string(obj, "base64")?
                .ok_or_else(|| serde::de::Error::custom("\"base64\" must be a string"))?;
            return Ok(PdfSource::Base64 {
                base64,
                name,
                mime_type,
            });
        }
        if obj.contains_key("url") {
            let url = optional_string(obj, "url")?
                .ok_or_else(|| serde::de::Error::custom("\"url\" must be a string"))?;
            return Ok(PdfSource::Url {
                url,
                name,
                mime_type,
            });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: expected an object with one of \"path\", \"base64\" or \"url\", but got keys: {:?}",
            keys
        )))
    }
}

impl PdfSource {
    /// Caller-supplied display name
    pub fn name(&self) -> Option<&str> {
        match self {
            PdfSource::Path { name, .. }
            | PdfSource::Base64 { name, .. }
            | PdfSource::Url { name, .. } => name.as_deref(),
        }
    }

    /// Caller-supplied MIME type
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            PdfSource::Path { mime_type, .. }
            | PdfSource::Base64 { mime_type, .. }
            | PdfSource::Url { mime_type, .. } => mime_type.as_deref(),
        }
    }
}

/// Security and resource configuration for the PDF Workbench server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories uploads may be read from and downloads written to
    pub resource_dirs: Vec<String>,
    /// Directory `download_pdf` writes `edited.pdf` to when no output path is given
    pub output_dir: Option<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Zoom factor for first-page previews (default: 1.2)
    pub preview_scale: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            output_dir: None,
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024, // 100MB
            preview_scale: PREVIEW_SCALE,
        }
    }
}

impl ServerConfig {
    /// Read `PDF_WORKBENCH_RESOURCE_DIRS`, `PDF_WORKBENCH_OUTPUT_DIR` and
    /// `PDF_WORKBENCH_ALLOW_PRIVATE_URLS` on top of the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = Self::default();

        if let Some(dirs) = lookup("PDF_WORKBENCH_RESOURCE_DIRS") {
            config.resource_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
        }
        if let Some(dir) = lookup("PDF_WORKBENCH_OUTPUT_DIR") {
            if !dir.is_empty() {
                config.output_dir = Some(dir.to_string_lossy().into_owned());
            }
        }
        if let Some(flag) = lookup("PDF_WORKBENCH_ALLOW_PRIVATE_URLS") {
            config.allow_private_urls = matches!(
                flag.to_string_lossy().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }

        config
    }
}

/// PDF Workbench MCP server
#[derive(Clone)]
pub struct PdfServer {
    session: Arc<Mutex<Session>>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for list_pdfs
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPdfsParams {
    /// Directory to search for PDF files
    pub directory: String,
    /// Search subdirectories recursively (default: false)
    #[serde(default)]
    pub recursive: bool,
    /// Filename pattern to filter (e.g., "report*.pdf"). Supports glob patterns.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PdfFileInfo {
    /// Full path to the PDF file
    pub path: String,
    /// Filename only
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (ISO 8601 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListPdfsResult {
    /// Directory that was searched
    pub directory: String,
    /// List of PDF files found
    pub files: Vec<PdfFileInfo>,
    /// Total number of files found
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for add_files / drop_files / list_files
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddFilesParams {
    /// Files to add, in order
    pub sources: Vec<PdfSource>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FileEntry {
    /// Name the file is listed under
    pub name: String,
    /// Size in bytes
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PreviewEntry {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
}

impl From<PreviewInfo> for PreviewEntry {
    fn from(info: PreviewInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RejectedSource {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct AddFilesResult {
    /// Files accepted from this call
    pub added: u32,
    /// Files in the session
    pub total_count: u32,
    /// All files in the session, in upload order
    pub files: Vec<FileEntry>,
    /// Status list, one line per file
    pub status: Vec<String>,
    /// Preview of the last file in the session
    pub preview: Option<PreviewEntry>,
    /// Sources that could not be read
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedSource>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListFilesResult {
    pub total_count: u32,
    pub files: Vec<FileEntry>,
    pub status: Vec<String>,
}

// ============================================================================
// Request/Response types for merge / compress / rotate / watermark
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WatermarkPdfParams {
    /// "center", "bottom-right" or anything else for top-left (default: "center")
    #[serde(default = "default_watermark_position")]
    pub position: String,
    /// Text to stamp on every page (default: "CONFIDENTIAL")
    #[serde(default = "default_watermark_text")]
    pub text: String,
}

fn default_watermark_position() -> String {
    DEFAULT_WATERMARK_POSITION.to_string()
}

fn default_watermark_text() -> String {
    DEFAULT_WATERMARK_TEXT.to_string()
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct OperationResult {
    /// Whether a new result document was produced
    pub success: bool,
    /// Message for the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Page count of the new result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Watermark anchor that was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<WatermarkPosition>,
    /// Preview of the new result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    fn from_outcome(tool: &str, outcome: crate::error::Result<OperationOutcome>) -> Self {
        match outcome {
            Ok(outcome) => Self {
                success: true,
                notice: Some(outcome.notice.to_string()),
                page_count: Some(outcome.page_count as u32),
                position: None,
                preview: outcome.preview.map(PreviewEntry::from),
                error: None,
            },
            Err(e) if e.is_precondition() => {
                tracing::info!(tool, notice = %e, "Precondition not met");
                Self {
                    success: false,
                    notice: Some(e.client_message()),
                    page_count: None,
                    position: None,
                    preview: None,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(tool, error = %e, "Operation failed");
                Self {
                    success: false,
                    notice: None,
                    page_count: None,
                    position: None,
                    preview: None,
                    error: Some(e.client_message()),
                }
            }
        }
    }
}

// ============================================================================
// Request/Response types for download_pdf / get_preview
// ============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct DownloadPdfParams {
    /// Also write the file here (default: `<output_dir>/edited.pdf` when configured)
    #[serde(default)]
    pub output_path: Option<String>,
    /// Rewrite the bytes with qpdf to reduce file size (default: false)
    #[serde(default)]
    pub optimize: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DownloadPdfResult {
    pub success: bool,
    pub file_name: String,
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// File content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
    /// Where the file was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GetPreviewResult {
    /// Whether anything has been rendered yet
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// PNG image data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn to_response<T: Serialize>(result: &T) -> String {
    let response = serde_json::json!({ "results": [result] });
    serde_json::to_string_pretty(&response).unwrap_or_default()
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl PdfServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new PdfServer with full configuration, previewing with PDFium
    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_rasterizer(config, Arc::new(PdfiumRasterizer))
    }

    /// Create a new PdfServer with a custom preview rasterizer
    pub fn with_rasterizer(config: ServerConfig, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        let session = match Session::new(Arc::clone(&rasterizer))
            .with_preview_scale(config.preview_scale)
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring configured preview scale");
                Session::new(rasterizer)
            }
        };

        Self {
            session: Arc::new(Mutex::new(session)),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Add files from the file picker
    #[tool(
        description = "Add PDF files to the editing session. Files are kept in upload order; a file with the same name and size as one already added is skipped. The first page of the last file is rendered as the preview.

Source format: each element must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"} or {\"base64\": \"...\", \"name\": \"file.pdf\"}. Any source may carry \"name\" and \"mime_type\" overrides."
    )]
    async fn add_files(&self, Parameters(params): Parameters<AddFilesParams>) -> String {
        to_response(&self.process_add_files(&params, false).await)
    }

    /// Add files dropped onto the drop zone
    #[tool(
        description = "Add dropped files to the editing session. Same as add_files, except that only files whose MIME type is application/pdf are accepted; others are silently ignored.

Source format: each element must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"} or {\"base64\": \"...\", \"name\": \"file.pdf\"}. Any source may carry \"name\" and \"mime_type\" overrides."
    )]
    async fn drop_files(&self, Parameters(params): Parameters<AddFilesParams>) -> String {
        to_response(&self.process_add_files(&params, true).await)
    }

    /// Show the uploaded files
    #[tool(description = "List the files in the editing session, in upload order, with a status line per file.")]
    async fn list_files(&self) -> String {
        to_response(&self.process_list_files().await)
    }

    /// Merge all uploaded files
    #[tool(
        description = "Merge every uploaded file, in upload order, into a new result document. Needs at least two uploaded files. The result replaces any earlier result and becomes the preview."
    )]
    async fn merge_pdfs(&self) -> String {
        let outcome = self.session.lock().await.merge().await;
        to_response(&OperationResult::from_outcome("merge_pdfs", outcome))
    }

    /// Shrink the first uploaded file
    #[tool(
        description = "Scale every page of the first uploaded file, and its content, to 90% of its size. The result replaces any earlier result and becomes the preview.

For byte-level size reduction use download_pdf with optimize=true."
    )]
    async fn compress_pdf(&self) -> String {
        let outcome = self.session.lock().await.compress().await;
        to_response(&OperationResult::from_outcome("compress_pdf", outcome))
    }

    /// Rotate the first uploaded file
    #[tool(
        description = "Rotate every page of the first uploaded file 90 degrees clockwise. Always starts from the uploaded file, not from the previous result. The result replaces any earlier result and becomes the preview."
    )]
    async fn rotate_pdf(&self) -> String {
        let outcome = self.session.lock().await.rotate().await;
        to_response(&OperationResult::from_outcome("rotate_pdf", outcome))
    }

    /// Watermark the first uploaded file
    #[tool(
        description = "Stamp text on every page of the first uploaded file in red Helvetica-Bold, 24pt, 40% opacity.

Options:
- position: \"center\" (default), \"bottom-right\", anything else places the text at the top-left
- text: the watermark text (default: \"CONFIDENTIAL\"); only Latin-1 characters can be drawn

The result replaces any earlier result and becomes the preview."
    )]
    async fn watermark_pdf(&self, Parameters(params): Parameters<WatermarkPdfParams>) -> String {
        let options = WatermarkOptions {
            position: WatermarkPosition::parse(&params.position),
            text: params.text,
        };
        let position = options.position;

        let outcome = self.session.lock().await.watermark(options).await;
        let mut result = OperationResult::from_outcome("watermark_pdf", outcome);
        if result.success {
            result.position = Some(position);
        }
        to_response(&result)
    }

    /// Download the current result
    #[tool(
        description = "Serialize the current result document as edited.pdf (application/pdf) and return it base64-encoded. Optionally writes it to output_path, or to the configured output directory.

Options:
- optimize: rewrite the file with qpdf (object streams, stream compression, unused object removal) to make it smaller"
    )]
    async fn download_pdf(&self, Parameters(params): Parameters<DownloadPdfParams>) -> String {
        to_response(&self.process_download_pdf(&params).await)
    }

    /// Show the preview canvas
    #[tool(
        description = "Return the current preview canvas (first page of the most recent file or result) as a base64-encoded PNG with its pixel size."
    )]
    async fn get_preview(&self) -> String {
        let result = self.process_get_preview().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "get_preview failed");
            GetPreviewResult {
                available: false,
                width: None,
                height: None,
                mime_type: None,
                data_base64: None,
                error: Some(e.client_message()),
            }
        });
        to_response(&result)
    }

    /// List PDF files in a directory
    #[tool(
        description = "List PDF files in a directory. Use this to find files to pass to add_files.

Returns for each file:
- Full path (can be used directly as {\"path\": ...} source)
- Filename
- File size in bytes
- Last modified time

Supports recursive search and glob pattern filtering."
    )]
    async fn list_pdfs(&self, Parameters(params): Parameters<ListPdfsParams>) -> String {
        let result = self.process_list_pdfs(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "list_pdfs failed");
            ListPdfsResult {
                directory: params.directory.clone(),
                files: vec![],
                total_count: 0,
                error: Some(e.client_message()),
            }
        });
        to_response(&result)
    }
}

impl PdfServer {
    fn source_name(source: &PdfSource) -> String {
        match source {
            PdfSource::Path { path, .. } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
            PdfSource::Url { url, .. } => url.clone(),
        }
    }

    async fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path, .. } => {
                self.validate_path_access(path)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64, name, .. } => resolve_base64(base64, name.as_deref()),
            PdfSource::Url { url, .. } => {
                resolve_url(
                    url,
                    self.config.allow_private_urls,
                    self.config.max_download_bytes,
                )
                .await
            }
        }
    }

    /// Build an intake candidate, applying the caller's name and MIME overrides
    fn candidate(source: &PdfSource, mut resolved: ResolvedPdf) -> FileCandidate {
        if let Some(name) = source.name() {
            resolved.file_name = name.to_string();
        }
        if let Some(mime_type) = source.mime_type() {
            resolved.mime_type = Some(mime_type.to_string());
        }
        resolved.into_candidate()
    }

    fn file_entries(files: &FileList) -> Vec<FileEntry> {
        files
            .iter()
            .map(|f| FileEntry {
                name: f.name().to_string(),
                size: f.size(),
                mime_type: f.mime_type().to_string(),
            })
            .collect()
    }

    /// Resolve every source, then add the batch to the session in one step
    pub async fn process_add_files(
        &self,
        params: &AddFilesParams,
        dropped: bool,
    ) -> AddFilesResult {
        let mut candidates = Vec::with_capacity(params.sources.len());
        let mut rejected = Vec::new();

        for source in &params.sources {
            match self.resolve_source(source).await {
                Ok(resolved) => candidates.push(Self::candidate(source, resolved)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        source = %Self::source_name(source),
                        "Failed to read upload"
                    );
                    rejected.push(RejectedSource {
                        source: Self::source_name(source),
                        error: e.client_message(),
                    });
                }
            }
        }

        let mut session = self.session.lock().await;
        let IntakeOutcome {
            added,
            total,
            status,
            preview,
        } = if dropped {
            session.drop_files(candidates).await
        } else {
            session.add_files(candidates).await
        };

        AddFilesResult {
            added: added as u32,
            total_count: total as u32,
            files: Self::file_entries(session.files()),
            status,
            preview: preview.map(PreviewEntry::from),
            rejected,
        }
    }

    pub async fn process_list_files(&self) -> ListFilesResult {
        let session = self.session.lock().await;
        let files = session.files();
        ListFilesResult {
            total_count: files.len() as u32,
            files: Self::file_entries(files),
            status: files.status_lines(),
        }
    }

    pub async fn process_download_pdf(&self, params: &DownloadPdfParams) -> DownloadPdfResult {
        let mut result = DownloadPdfResult {
            success: false,
            file_name: DOWNLOAD_FILE_NAME.to_string(),
            mime_type: crate::session::DOWNLOAD_MIME_TYPE.to_string(),
            size: 0,
            data_base64: None,
            output_path: None,
            notice: None,
            error: None,
        };

        let download = self.session.lock().await.download(params.optimize).await;
        let download = match download {
            Ok(download) => download,
            Err(e) if e.is_precondition() => {
                tracing::info!(notice = %e, "Nothing to download");
                result.notice = Some(e.client_message());
                return result;
            }
            Err(e) => {
                tracing::warn!(error = %e, "download_pdf failed");
                result.error = Some(e.client_message());
                return result;
            }
        };

        let target = params.output_path.clone().or_else(|| {
            self.config.output_dir.as_ref().map(|dir| {
                Path::new(dir)
                    .join(download.file_name)
                    .to_string_lossy()
                    .into_owned()
            })
        });
        match self.write_output(&target, &download.data) {
            Ok(written) => result.output_path = written,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write download");
                result.error = Some(e.client_message());
                return result;
            }
        }

        result.success = true;
        result.size = download.size() as u64;
        result.data_base64 =
            Some(base64::engine::general_purpose::STANDARD.encode(&download.data));
        result
    }

    pub async fn process_get_preview(&self) -> crate::error::Result<GetPreviewResult> {
        let canvas = self.session.lock().await.canvas().cloned();
        let Some(canvas) = canvas else {
            return Ok(GetPreviewResult {
                available: false,
                width: None,
                height: None,
                mime_type: None,
                data_base64: None,
                error: None,
            });
        };

        let (width, height) = (canvas.width(), canvas.height());
        let data_base64 = tokio::task::spawn_blocking(move || canvas.to_png_base64()).await??;

        Ok(GetPreviewResult {
            available: true,
            width: Some(width),
            height: Some(height),
            mime_type: Some("image/png".to_string()),
            data_base64: Some(data_base64),
            error: None,
        })
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| {
            crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            }
        })?;

        if self.is_within_resource_dirs(&canonical) {
            Ok(canonical)
        } else {
            Err(crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            })
        }
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    fn validate_output_path_access(
        &self,
        path: &str,
    ) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let parent = path_obj.parent().unwrap_or(Path::new("."));

        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| {
            crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            }
        })?;

        let canonical_target =
            canonical_parent.join(path_obj.file_name().unwrap_or(std::ffi::OsStr::new("")));

        if self.is_within_resource_dirs(&canonical_target) {
            Ok(canonical_target)
        } else {
            Err(crate::error::Error::PathAccessDenied {
                path: path.to_string(),
            })
        }
    }

    fn is_within_resource_dirs(&self, canonical: &Path) -> bool {
        self.config.resource_dirs.iter().any(|dir| {
            std::fs::canonicalize(dir)
                .map(|cd| canonical.starts_with(&cd))
                .unwrap_or(false)
        })
    }

    /// Write output data to a file path, with sandbox validation.
    fn write_output(
        &self,
        output_path: &Option<String>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        let Some(path_str) = output_path else {
            return Ok(None);
        };
        self.validate_output_path_access(path_str)?;

        let path = Path::new(path_str);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, data)?;
        tracing::info!(path = %path_str, bytes = data.len(), "Wrote download");
        Ok(Some(path_str.clone()))
    }

    /// List PDF files in a directory
    pub fn process_list_pdfs(
        &self,
        params: &ListPdfsParams,
    ) -> crate::error::Result<ListPdfsResult> {
        if !self.config.resource_dirs.is_empty() {
            let canonical = std::fs::canonicalize(&params.directory).map_err(|_| {
                crate::error::Error::PathAccessDenied {
                    path: params.directory.clone(),
                }
            })?;
            if !self.is_within_resource_dirs(&canonical) {
                return Err(crate::error::Error::PathAccessDenied {
                    path: params.directory.clone(),
                });
            }
        }

        let dir_path = Path::new(&params.directory);

        if !dir_path.exists() {
            return Err(crate::error::Error::PdfNotFound {
                path: params.directory.clone(),
            });
        }

        if !dir_path.is_dir() {
            return Err(crate::error::Error::InvalidPdf {
                reason: format!("{} is not a directory", params.directory),
            });
        }

        let pattern = params
            .pattern
            .as_ref()
            .and_then(|p| glob::Pattern::new(p).ok());

        let mut files = Vec::new();
        Self::collect_pdfs(dir_path, params.recursive, &pattern, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ListPdfsResult {
            directory: params.directory.clone(),
            total_count: files.len() as u32,
            files,
            error: None,
        })
    }

    fn collect_pdfs(
        dir: &Path,
        recursive: bool,
        pattern: &Option<glob::Pattern>,
        files: &mut Vec<PdfFileInfo>,
    ) -> crate::error::Result<()> {
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();

            if path.is_dir() {
                if recursive {
                    let _ = Self::collect_pdfs(&path, recursive, pattern, files);
                }
                continue;
            }

            let is_pdf = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false);
            if !path.is_file() || !is_pdf {
                continue;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if let Some(pat) = pattern {
                if !pat.matches(&name) {
                    continue;
                }
            }

            let metadata = std::fs::metadata(&path).ok();
            let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
            let modified = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0))
                .map(|dt| dt.to_rfc3339());

            files.push(PdfFileInfo {
                path: path.to_string_lossy().to_string(),
                name,
                size,
                modified,
            });
        }

        Ok(())
    }
}

impl Default for PdfServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for PdfServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF Workbench keeps one editing session. Add files with add_files or drop_files, \
                 then merge_pdfs, compress_pdf, rotate_pdf or watermark_pdf. Each operation replaces \
                 the current result, which download_pdf returns as edited.pdf. get_preview shows \
                 the first page of the latest file or result."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let server = PdfServer::with_config(config);

    tracing::info!("PDF Workbench ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{LopdfDocument, PageSize, PdfDocument};
    use image::RgbaImage;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// Renders a blank image sized from the first page's MediaBox
    struct BoxRasterizer;

    impl PageRasterizer for BoxRasterizer {
        fn render_first_page(&self, data: &[u8], scale: f32) -> crate::error::Result<RgbaImage> {
            let doc = LopdfDocument::load(data)?;
            let size = doc.page_size(0)?;
            Ok(RgbaImage::new(
                (size.width * scale).round() as u32,
                (size.height * scale).round() as u32,
            ))
        }
    }

    fn server(config: ServerConfig) -> PdfServer {
        PdfServer::with_rasterizer(config, Arc::new(BoxRasterizer))
    }

    fn sample_base64(pages: usize) -> String {
        let mut doc = LopdfDocument::create();
        for _ in 0..pages {
            doc.add_blank_page(PageSize::new(100.0, 200.0)).unwrap();
        }
        base64::engine::general_purpose::STANDARD.encode(doc.save().unwrap())
    }

    fn base64_source(name: &str, pages: usize) -> PdfSource {
        PdfSource::Base64 {
            base64: sample_base64(pages),
            name: Some(name.to_string()),
            mime_type: None,
        }
    }

    #[test]
    fn test_source_name() {
        assert_eq!(
            PdfServer::source_name(&PdfSource::Path {
                path: "/test.pdf".to_string(),
                name: None,
                mime_type: None,
            }),
            "/test.pdf"
        );
        assert_eq!(PdfServer::source_name(&base64_source("a.pdf", 1)), "<base64>");
        assert_eq!(
            PdfServer::source_name(&PdfSource::Url {
                url: "https://example.com/test.pdf".to_string(),
                name: None,
                mime_type: None,
            }),
            "https://example.com/test.pdf"
        );
    }

    #[test]
    fn test_pdf_source_deserialization() {
        let source: PdfSource = serde_json::from_str(r#"{"path": "/test.pdf"}"#).unwrap();
        assert!(matches!(source, PdfSource::Path { .. }));
        assert_eq!(source.name(), None);

        let source: PdfSource =
            serde_json::from_str(r#"{"base64": "JVBERi0xLjQ=", "name": "a.pdf"}"#).unwrap();
        assert!(matches!(source, PdfSource::Base64 { .. }));
        assert_eq!(source.name(), Some("a.pdf"));

        let source: PdfSource = serde_json::from_str(
            r#"{"url": "https://example.com/x", "mime_type": "application/pdf"}"#,
        )
        .unwrap();
        assert!(matches!(source, PdfSource::Url { .. }));
        assert_eq!(source.mime_type(), Some("application/pdf"));
    }

    #[test]
    fn test_pdf_source_deserialization_errors() {
        assert!(serde_json::from_str::<PdfSource>(r#"{"path": 5}"#).is_err());
        assert!(serde_json::from_str::<PdfSource>(r#"{"path": "/a.pdf", "name": 1}"#).is_err());
        assert!(serde_json::from_str::<PdfSource>(r#"{"cache_key": "abc"}"#).is_err());
        assert!(serde_json::from_str::<PdfSource>(r#""/a.pdf""#).is_err());
    }

    #[test]
    fn test_watermark_params_defaults() {
        let params: WatermarkPdfParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.position, "center");
        assert_eq!(params.text, "CONFIDENTIAL");

        let params: WatermarkPdfParams =
            serde_json::from_str(r#"{"position": "", "text": ""}"#).unwrap();
        assert_eq!(params.position, "");
        assert_eq!(params.text, "");
    }

    #[test]
    fn test_download_params_defaults() {
        let params: DownloadPdfParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.output_path, None);
        assert!(!params.optimize);
    }

    #[test]
    fn test_config_from_lookup() {
        let dirs = std::env::join_paths(["/data/in", "/data/shared"]).unwrap();
        let vars: HashMap<&str, OsString> = HashMap::from([
            ("PDF_WORKBENCH_RESOURCE_DIRS", dirs),
            ("PDF_WORKBENCH_OUTPUT_DIR", OsString::from("/data/out")),
            ("PDF_WORKBENCH_ALLOW_PRIVATE_URLS", OsString::from("TRUE")),
        ]);
        let config = ServerConfig::from_lookup(|key| vars.get(key).cloned());

        assert_eq!(config.resource_dirs, vec!["/data/in", "/data/shared"]);
        assert_eq!(config.output_dir.as_deref(), Some("/data/out"));
        assert!(config.allow_private_urls);
        assert_eq!(config.max_download_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_config_from_empty_lookup() {
        let config = ServerConfig::from_lookup(|_| None);
        assert!(config.resource_dirs.is_empty());
        assert_eq!(config.output_dir, None);
        assert!(!config.allow_private_urls);
        assert_eq!(config.preview_scale, 1.2);
    }

    #[tokio::test]
    async fn test_add_files_reports_status_and_preview() {
        let server = server(ServerConfig::default());
        let params = AddFilesParams {
            sources: vec![base64_source("a.pdf", 1), base64_source("b.pdf", 2)],
        };

        let result = server.process_add_files(&params, false).await;
        assert_eq!(result.added, 2);
        assert_eq!(result.total_count, 2);
        assert_eq!(result.status, vec!["✅ a.pdf", "✅ b.pdf"]);
        assert_eq!(
            result.preview,
            Some(PreviewEntry {
                width: 120,
                height: 240
            })
        );
        assert!(result.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_drop_files_ignores_other_types() {
        let server = server(ServerConfig::default());
        let params = AddFilesParams {
            sources: vec![
                base64_source("notes.txt", 1),
                PdfSource::Base64 {
                    base64: sample_base64(1),
                    name: Some("scan".to_string()),
                    mime_type: Some("application/pdf".to_string()),
                },
            ],
        };

        let result = server.process_add_files(&params, true).await;
        assert_eq!(result.added, 1);
        assert_eq!(result.files[0].name, "scan");
        assert_eq!(result.files[0].mime_type, "application/pdf");
    }

    #[tokio::test]
    async fn test_add_files_rejects_unreadable_sources() {
        let server = server(ServerConfig::default());
        let params = AddFilesParams {
            sources: vec![
                PdfSource::Path {
                    path: "/nonexistent/file.pdf".to_string(),
                    name: None,
                    mime_type: None,
                },
                base64_source("a.pdf", 1),
            ],
        };

        let result = server.process_add_files(&params, false).await;
        assert_eq!(result.added, 1);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].source, "/nonexistent/file.pdf");
        assert_eq!(result.rejected[0].error, "PDF not found");
    }

    #[tokio::test]
    async fn test_path_sources_are_sandboxed() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("secret.pdf");
        std::fs::write(&file, b"%PDF-1.7").unwrap();

        let server = server(ServerConfig {
            resource_dirs: vec![allowed.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });
        let params = AddFilesParams {
            sources: vec![PdfSource::Path {
                path: file.to_string_lossy().to_string(),
                name: None,
                mime_type: None,
            }],
        };

        let result = server.process_add_files(&params, false).await;
        assert_eq!(result.added, 0);
        assert_eq!(result.rejected[0].error, "Access denied");
    }

    #[tokio::test]
    async fn test_merge_notice_in_response() {
        let server = server(ServerConfig::default());
        server
            .process_add_files(&AddFilesParams { sources: vec![base64_source("a.pdf", 1)] }, false)
            .await;

        let outcome = server.session.lock().await.merge().await;
        let result = OperationResult::from_outcome("merge_pdfs", outcome);
        assert!(!result.success);
        assert_eq!(result.notice.as_deref(), Some("Upload at least two PDFs to merge."));
        assert_eq!(result.error, None);

        server
            .process_add_files(&AddFilesParams { sources: vec![base64_source("b.pdf", 2)] }, false)
            .await;
        let outcome = server.session.lock().await.merge().await;
        let result = OperationResult::from_outcome("merge_pdfs", outcome);
        assert!(result.success);
        assert_eq!(
            result.notice.as_deref(),
            Some("✅ Merge complete! You can now download.")
        );
        assert_eq!(result.page_count, Some(3));
    }

    #[tokio::test]
    async fn test_download_without_result() {
        let server = server(ServerConfig::default());
        let result = server.process_download_pdf(&DownloadPdfParams::default()).await;
        assert!(!result.success);
        assert_eq!(result.notice.as_deref(), Some("No PDF generated yet."));
        assert_eq!(result.data_base64, None);
    }

    #[tokio::test]
    async fn test_download_writes_to_output_dir() {
        let out = tempfile::tempdir().unwrap();
        let server = server(ServerConfig {
            output_dir: Some(out.path().to_string_lossy().to_string()),
            ..ServerConfig::default()
        });
        server
            .process_add_files(&AddFilesParams { sources: vec![base64_source("a.pdf", 2)] }, false)
            .await;
        server.session.lock().await.rotate().await.unwrap();

        let result = server.process_download_pdf(&DownloadPdfParams::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.file_name, "edited.pdf");
        assert_eq!(result.mime_type, "application/pdf");

        let written = out.path().join("edited.pdf");
        assert_eq!(result.output_path, Some(written.to_string_lossy().to_string()));
        let on_disk = std::fs::read(&written).unwrap();
        assert_eq!(on_disk.len() as u64, result.size);

        let returned = base64::engine::general_purpose::STANDARD
            .decode(result.data_base64.unwrap())
            .unwrap();
        assert_eq!(returned, on_disk);
        assert_eq!(LopdfDocument::load(&on_disk).unwrap().rotation(1).unwrap(), 90);
    }

    #[tokio::test]
    async fn test_download_output_path_is_sandboxed() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let server = server(ServerConfig {
            resource_dirs: vec![allowed.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });
        server
            .process_add_files(&AddFilesParams { sources: vec![base64_source("a.pdf", 1)] }, false)
            .await;
        server.session.lock().await.compress().await.unwrap();

        let params = DownloadPdfParams {
            output_path: Some(outside.path().join("x.pdf").to_string_lossy().to_string()),
            optimize: false,
        };
        let result = server.process_download_pdf(&params).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Access denied"));
    }

    #[tokio::test]
    async fn test_get_preview() {
        let server = server(ServerConfig::default());
        let empty = server.process_get_preview().await.unwrap();
        assert!(!empty.available);

        server
            .process_add_files(&AddFilesParams { sources: vec![base64_source("a.pdf", 1)] }, false)
            .await;
        let preview = server.process_get_preview().await.unwrap();
        assert!(preview.available);
        assert_eq!((preview.width, preview.height), (Some(120), Some(240)));
        assert_eq!(preview.mime_type.as_deref(), Some("image/png"));
        let png = base64::engine::general_purpose::STANDARD
            .decode(preview.data_base64.unwrap())
            .unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_list_files() {
        let server = server(ServerConfig::default());
        server
            .process_add_files(
                &AddFilesParams {
                    sources: vec![base64_source("a.pdf", 1), base64_source("a.pdf", 1)],
                },
                false,
            )
            .await;

        let result = server.process_list_files().await;
        assert_eq!(result.total_count, 1);
        assert_eq!(result.status, vec!["✅ a.pdf"]);
    }

    #[test]
    fn test_invalid_preview_scale_falls_back() {
        let server = server(ServerConfig {
            preview_scale: -1.0,
            ..ServerConfig::default()
        });
        let scale = server.session.try_lock().unwrap().preview_scale();
        assert_eq!(scale, 1.2);
    }

    #[test]
    fn test_list_pdfs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("a.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.pdf"), b"%PDF").unwrap();

        let server = server(ServerConfig::default());
        let mut params = ListPdfsParams {
            directory: dir.path().to_string_lossy().to_string(),
            recursive: false,
            pattern: None,
        };
        let names: Vec<String> = server
            .process_list_pdfs(&params)
            .unwrap()
            .files
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);

        params.recursive = true;
        params.pattern = Some("c*".to_string());
        let result = server.process_list_pdfs(&params).unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.files[0].name, "c.pdf");
        assert_eq!(result.files[0].size, 4);
        assert!(result.files[0].modified.is_some());
    }

    #[test]
    fn test_list_pdfs_errors() {
        let server = server(ServerConfig::default());
        let missing = ListPdfsParams {
            directory: "/nonexistent/directory/path".to_string(),
            recursive: false,
            pattern: None,
        };
        assert!(matches!(
            server.process_list_pdfs(&missing),
            Err(crate::error::Error::PdfNotFound { .. })
        ));
    }
}
