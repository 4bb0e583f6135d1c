//! Uploaded file list

use std::sync::Arc;

/// MIME type accepted from drag-and-drop
pub const PDF_MIME: &str = "application/pdf";

/// A file offered by the user, before deduplication
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileCandidate {
    /// Candidate whose MIME type is guessed from the file name
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            name,
            mime_type,
            data,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A file accepted into the session. Identity is `(name, size)`.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    name: String,
    mime_type: String,
    data: Arc<Vec<u8>>,
}

impl UploadedFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Shared handle to the file bytes
    pub fn data(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }

    fn is(&self, name: &str, size: u64) -> bool {
        self.name == name && self.size() == size
    }
}

/// Ordered, duplicate-free list of uploaded files.
///
/// Files keep their arrival order and are never removed.
#[derive(Debug, Default)]
pub struct FileList {
    files: Vec<UploadedFile>,
}

impl FileList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every candidate not already present. Returns how many were added.
    pub fn add(&mut self, candidates: impl IntoIterator<Item = FileCandidate>) -> usize {
        let before = self.files.len();
        for candidate in candidates {
            if self.contains(&candidate.name, candidate.size()) {
                tracing::debug!(
                    name = %candidate.name,
                    size = candidate.size(),
                    "Skipping duplicate file"
                );
                continue;
            }
            self.files.push(UploadedFile {
                name: candidate.name,
                mime_type: candidate.mime_type,
                data: Arc::new(candidate.data),
            });
        }
        self.files.len() - before
    }

    /// Like [`FileList::add`], keeping only candidates typed as PDF
    pub fn add_dropped(&mut self, candidates: impl IntoIterator<Item = FileCandidate>) -> usize {
        self.add(candidates.into_iter().filter(|candidate| {
            let accepted = candidate.mime_type == PDF_MIME;
            if !accepted {
                tracing::debug!(
                    name = %candidate.name,
                    mime_type = %candidate.mime_type,
                    "Ignoring dropped non-PDF file"
                );
            }
            accepted
        }))
    }

    pub fn contains(&self, name: &str, size: u64) -> bool {
        self.files.iter().any(|f| f.is(name, size))
    }

    pub fn first(&self) -> Option<&UploadedFile> {
        self.files.first()
    }

    pub fn last(&self) -> Option<&UploadedFile> {
        self.files.last()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.iter()
    }

    /// One status line per file
    pub fn status_lines(&self) -> Vec<String> {
        self.files.iter().map(|f| format!("✅ {}", f.name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(name: &str, size: usize) -> FileCandidate {
        FileCandidate::new(name, vec![0u8; size])
    }

    fn names(list: &FileList) -> Vec<&str> {
        list.iter().map(|f| f.name()).collect()
    }

    #[test]
    fn test_mime_type_guessed_from_name() {
        assert_eq!(candidate("a.pdf", 1).mime_type, "application/pdf");
        assert_eq!(candidate("a.PDF", 1).mime_type, "application/pdf");
        assert_eq!(candidate("notes.txt", 1).mime_type, "text/plain");
        assert_eq!(
            candidate("no-extension", 1).mime_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn test_explicit_mime_type_wins() {
        let c = candidate("scan", 1).with_mime_type(PDF_MIME);
        assert_eq!(c.mime_type, PDF_MIME);
    }

    #[test]
    fn test_add_preserves_order() {
        let mut list = FileList::new();
        assert_eq!(list.add([candidate("b.pdf", 2), candidate("a.pdf", 1)]), 2);
        assert_eq!(list.add([candidate("c.pdf", 3)]), 1);
        assert_eq!(names(&list), vec!["b.pdf", "a.pdf", "c.pdf"]);
    }

    #[test]
    fn test_duplicates_need_same_name_and_size() {
        let mut list = FileList::new();
        list.add([candidate("a.pdf", 10)]);

        assert_eq!(list.add([candidate("a.pdf", 10)]), 0);
        assert_eq!(list.add([candidate("a.pdf", 11)]), 1);
        assert_eq!(list.add([candidate("b.pdf", 10)]), 1);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let mut list = FileList::new();
        let added = list.add([
            candidate("a.pdf", 1),
            candidate("a.pdf", 1),
            candidate("b.pdf", 1),
        ]);
        assert_eq!(added, 2);
        assert_eq!(names(&list), vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_no_duplicate_identities_after_many_batches() {
        let mut list = FileList::new();
        for round in 0..5 {
            list.add((0..4).map(|i| candidate(&format!("f{}.pdf", i), (i + round) % 3)));
        }
        let identities: Vec<(&str, u64)> = list.iter().map(|f| (f.name(), f.size())).collect();
        for (i, a) in identities.iter().enumerate() {
            assert!(!identities[i + 1..].contains(a), "duplicate {:?}", a);
        }
        // first occurrences keep their relative order
        assert_eq!(&names(&list)[..4], &["f0.pdf", "f1.pdf", "f2.pdf", "f3.pdf"]);
    }

    #[test]
    fn test_dropped_files_filtered_by_mime() {
        let mut list = FileList::new();
        let added = list.add_dropped([
            candidate("a.pdf", 1),
            candidate("photo.png", 1),
            candidate("blob", 1).with_mime_type(PDF_MIME),
        ]);
        assert_eq!(added, 2);
        assert_eq!(names(&list), vec!["a.pdf", "blob"]);
    }

    #[test]
    fn test_status_lines() {
        let mut list = FileList::new();
        list.add([candidate("a.pdf", 1), candidate("b.pdf", 1)]);
        assert_eq!(list.status_lines(), vec!["✅ a.pdf", "✅ b.pdf"]);
        assert_eq!(list.first().unwrap().name(), "a.pdf");
        assert_eq!(list.last().unwrap().name(), "b.pdf");
    }

    #[test]
    fn test_empty_list() {
        let list = FileList::new();
        assert!(list.is_empty());
        assert!(list.first().is_none());
        assert!(list.last().is_none());
        assert!(list.status_lines().is_empty());
    }
}
