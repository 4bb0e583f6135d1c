//! lopdf-backed implementation of [`PdfDocument`]

use super::document::{PageSize, PdfDocument, StandardFont, TextOptions};
use crate::error::{Error, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::HashSet;

/// Page attributes that may be inherited from an ancestor `Pages` node
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Page boxes that follow the MediaBox on resize when they coincide with it
const DEPENDENT_BOXES: [&[u8]; 4] = [b"CropBox", b"BleedBox", b"TrimBox", b"ArtBox"];

/// Upper bound on page tree depth when walking `Parent` links
const MAX_TREE_DEPTH: usize = 64;

/// WinAnsiEncoding code points in 0x80..=0x9F that differ from Latin-1
const WIN_ANSI_EXTRAS: [(char, u8); 27] = [
    ('€', 0x80),
    ('‚', 0x82),
    ('ƒ', 0x83),
    ('„', 0x84),
    ('…', 0x85),
    ('†', 0x86),
    ('‡', 0x87),
    ('ˆ', 0x88),
    ('‰', 0x89),
    ('Š', 0x8A),
    ('‹', 0x8B),
    ('Œ', 0x8C),
    ('Ž', 0x8E),
    ('‘', 0x91),
    ('’', 0x92),
    ('“', 0x93),
    ('”', 0x94),
    ('•', 0x95),
    ('–', 0x96),
    ('—', 0x97),
    ('˜', 0x98),
    ('™', 0x99),
    ('š', 0x9A),
    ('›', 0x9B),
    ('œ', 0x9C),
    ('ž', 0x9E),
    ('Ÿ', 0x9F),
];

/// PDF document backed by a [`lopdf::Document`]
#[derive(Debug, Clone)]
pub struct LopdfDocument {
    inner: Document,
}

/// Page object copied into a [`LopdfDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LopdfPage(ObjectId);

/// Font dictionary embedded in a [`LopdfDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LopdfFont {
    id: ObjectId,
    font: StandardFont,
}

impl LopdfFont {
    pub fn standard_font(&self) -> StandardFont {
        self.font
    }

    fn resource_name(&self) -> String {
        format!("F{}", self.id.0)
    }
}

impl LopdfDocument {
    /// Borrow the underlying lopdf document
    pub fn document(&self) -> &Document {
        &self.inner
    }

    /// Append an empty page of the given size
    pub fn add_blank_page(&mut self, size: PageSize) -> Result<()> {
        let content = Content {
            operations: Vec::new(),
        };
        let content_id = self
            .inner
            .add_object(Stream::new(Dictionary::new(), content.encode()?));
        let page_id = self.inner.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => rect_object([0.0, 0.0, size.width, size.height]),
            "Resources" => Dictionary::new(),
            "Contents" => content_id,
        });
        self.add_page(LopdfPage(page_id))
    }

    fn pages_root(&self) -> Result<ObjectId> {
        Ok(self.inner.catalog()?.get(b"Pages")?.as_reference()?)
    }

    fn page_id(&self, index: usize) -> Result<ObjectId> {
        let pages = self.inner.get_pages();
        let total = pages.len();
        pages
            .into_values()
            .nth(index)
            .ok_or(Error::PageOutOfBounds {
                page: index + 1,
                total,
            })
    }

    /// References to the page's content streams, in drawing order
    fn content_refs(&self, page_id: ObjectId) -> Result<Vec<Object>> {
        let page = self.inner.get_dictionary(page_id)?;
        let refs = match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.inner.get_object(*id)? {
                Object::Array(items) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Ok(refs)
    }

    fn add_content_stream(&mut self, operations: Vec<Operation>) -> Result<ObjectId> {
        let bytes = Content { operations }.encode()?;
        Ok(self
            .inner
            .add_object(Stream::new(Dictionary::new(), bytes)))
    }

    /// Surround the existing page content with `prefix` and `suffix`
    fn wrap_contents(
        &mut self,
        page_id: ObjectId,
        prefix: Vec<Operation>,
        suffix: Vec<Operation>,
    ) -> Result<()> {
        let existing = self.content_refs(page_id)?;
        let prefix_id = self.add_content_stream(prefix)?;
        let suffix_id = self.add_content_stream(suffix)?;

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(prefix_id));
        contents.extend(existing);
        contents.push(Object::Reference(suffix_id));

        self.inner
            .get_dictionary_mut(page_id)?
            .set("Contents", contents);
        Ok(())
    }

    fn append_contents(&mut self, page_id: ObjectId, operations: Vec<Operation>) -> Result<()> {
        let mut contents = self.content_refs(page_id)?;
        let stream_id = self.add_content_stream(operations)?;
        contents.push(Object::Reference(stream_id));

        self.inner
            .get_dictionary_mut(page_id)?
            .set("Contents", contents);
        Ok(())
    }
}

impl PdfDocument for LopdfDocument {
    type Page = LopdfPage;
    type Font = LopdfFont;

    fn create() -> Self {
        let mut inner = Document::with_version("1.7");
        let pages_id = inner.new_object_id();
        inner.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => Object::Integer(0),
            }),
        );
        let catalog_id = inner.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        inner.trailer.set("Root", catalog_id);
        Self { inner }
    }

    fn load(bytes: &[u8]) -> Result<Self> {
        let inner = Document::load_mem(bytes)?;
        Ok(Self { inner })
    }

    fn page_count(&self) -> usize {
        self.inner.get_pages().len()
    }

    fn copy_pages(&mut self, source: &Self, indices: &[usize]) -> Result<Vec<LopdfPage>> {
        let mut incoming = source.inner.clone();
        incoming.renumber_objects_with(self.inner.max_id + 1);

        let page_ids: Vec<ObjectId> = incoming.get_pages().into_values().collect();
        let mut seen = HashSet::new();
        let mut copied = Vec::with_capacity(indices.len());

        for &index in indices {
            let mut page_id = *page_ids.get(index).ok_or(Error::PageOutOfBounds {
                page: index + 1,
                total: page_ids.len(),
            })?;

            // Each requested copy must be its own page object
            if !seen.insert(page_id) {
                let duplicate = incoming.get_dictionary(page_id)?.clone();
                page_id = incoming.add_object(duplicate);
            }

            // Re-parenting drops whatever the old page tree provided
            let materialize: Vec<(&[u8], Object)> = {
                let page = incoming.get_dictionary(page_id)?;
                INHERITABLE
                    .iter()
                    .filter(|key| !page.has(key))
                    .filter_map(|key| {
                        inherited(&incoming, page_id, key).map(|value| (*key, value.clone()))
                    })
                    .collect()
            };
            let page = incoming.get_dictionary_mut(page_id)?;
            for (key, value) in materialize {
                page.set(key, value);
            }

            copied.push(LopdfPage(page_id));
        }

        self.inner.max_id = self.inner.max_id.max(incoming.max_id);
        self.inner.objects.extend(incoming.objects);
        Ok(copied)
    }

    fn add_page(&mut self, page: LopdfPage) -> Result<()> {
        let root = self.pages_root()?;
        self.inner.get_dictionary_mut(page.0)?.set("Parent", root);

        let pages = self.inner.get_dictionary_mut(root)?;
        let count = pages.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        pages
            .get_mut(b"Kids")?
            .as_array_mut()?
            .push(Object::Reference(page.0));
        pages.set("Count", count + 1);
        Ok(())
    }

    fn page_size(&self, index: usize) -> Result<PageSize> {
        let page_id = self.page_id(index)?;
        Ok(media_box(&self.inner, page_id)
            .map(|[llx, lly, urx, ury]| PageSize::new((urx - llx).abs(), (ury - lly).abs()))
            .unwrap_or(PageSize::LETTER))
    }

    fn set_page_size(&mut self, index: usize, size: PageSize) -> Result<()> {
        let page_id = self.page_id(index)?;
        let old = media_box(&self.inner, page_id).unwrap_or([
            0.0,
            0.0,
            PageSize::LETTER.width,
            PageSize::LETTER.height,
        ]);
        let resized = [old[0], old[1], old[0] + size.width, old[1] + size.height];

        let followers: Vec<&[u8]> = {
            let page = self.inner.get_dictionary(page_id)?;
            DEPENDENT_BOXES
                .iter()
                .copied()
                .filter(|key| {
                    page.get(key)
                        .ok()
                        .and_then(|value| rect(resolve(&self.inner, value)))
                        == Some(old)
                })
                .collect()
        };

        let page = self.inner.get_dictionary_mut(page_id)?;
        page.set("MediaBox", rect_object(resized));
        for key in followers {
            page.set(key, rect_object(resized));
        }
        Ok(())
    }

    fn rotation(&self, index: usize) -> Result<i64> {
        let page_id = self.page_id(index)?;
        Ok(inherited(&self.inner, page_id, b"Rotate")
            .and_then(|value| resolve(&self.inner, value).as_i64().ok())
            .unwrap_or(0))
    }

    fn set_rotation(&mut self, index: usize, degrees: i64) -> Result<()> {
        let page_id = self.page_id(index)?;
        self.inner
            .get_dictionary_mut(page_id)?
            .set("Rotate", Object::Integer(degrees));
        Ok(())
    }

    fn scale_content(&mut self, index: usize, factor: f32) -> Result<()> {
        let page_id = self.page_id(index)?;
        self.wrap_contents(
            page_id,
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(factor),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(factor),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
            ],
            vec![Operation::new("Q", vec![])],
        )
    }

    fn embed_font(&mut self, font: StandardFont) -> Result<LopdfFont> {
        let mut dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
        };
        if !font.is_symbolic() {
            dict.set("Encoding", "WinAnsiEncoding");
        }
        let id = self.inner.add_object(dict);
        Ok(LopdfFont { id, font })
    }

    fn draw_text(
        &mut self,
        index: usize,
        text: &str,
        options: &TextOptions<LopdfFont>,
    ) -> Result<()> {
        let encoded = encode_win_ansi(text).ok_or_else(|| Error::UnencodableText {
            font: options.font.font.base_font(),
            text: text.to_string(),
        })?;
        let page_id = self.page_id(index)?;

        let state_id = self.inner.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => Object::Real(options.opacity),
            "CA" => Object::Real(options.opacity),
        });
        let font_name = options.font.resource_name();
        let state_name = format!("GS{}", state_id.0);

        // Give the page its own resources so shared dictionaries stay untouched
        let mut resources = inherited(&self.inner, page_id, b"Resources")
            .map(|value| resolve_dict(&self.inner, value))
            .unwrap_or_default();
        let mut fonts = resources
            .get(b"Font")
            .ok()
            .map(|value| resolve_dict(&self.inner, value))
            .unwrap_or_default();
        fonts.set(font_name.as_str(), options.font.id);
        let mut states = resources
            .get(b"ExtGState")
            .ok()
            .map(|value| resolve_dict(&self.inner, value))
            .unwrap_or_default();
        states.set(state_name.as_str(), state_id);
        resources.set("Font", fonts);
        resources.set("ExtGState", states);
        self.inner
            .get_dictionary_mut(page_id)?
            .set("Resources", resources);

        // Isolate the existing drawing so its state cannot leak into ours
        self.wrap_contents(
            page_id,
            vec![Operation::new("q", vec![])],
            vec![Operation::new("Q", vec![])],
        )?;

        let (sin, cos) = options.rotate_degrees.to_radians().sin_cos();
        let color = options.color;
        self.append_contents(
            page_id,
            vec![
                Operation::new("q", vec![]),
                Operation::new("gs", vec![Object::Name(state_name.into_bytes())]),
                Operation::new(
                    "rg",
                    vec![
                        Object::Real(color.r),
                        Object::Real(color.g),
                        Object::Real(color.b),
                    ],
                ),
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(font_name.into_bytes()),
                        Object::Real(options.size),
                    ],
                ),
                Operation::new(
                    "Tm",
                    vec![
                        Object::Real(cos),
                        Object::Real(sin),
                        Object::Real(-sin),
                        Object::Real(cos),
                        Object::Real(options.x),
                        Object::Real(options.y),
                    ],
                ),
                Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        )
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        self.inner.prune_objects();
        self.inner.compress();
        let mut bytes = Vec::new();
        self.inner.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

/// Find `key` on the page or on the nearest ancestor that defines it
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn resolve<'a>(doc: &'a Document, value: &'a Object) -> &'a Object {
    match value {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(value),
        other => other,
    }
}

fn resolve_dict(doc: &Document, value: &Object) -> Dictionary {
    resolve(doc, value)
        .as_dict()
        .map(Clone::clone)
        .unwrap_or_default()
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<[f32; 4]> {
    inherited(doc, page_id, b"MediaBox").and_then(|value| rect(resolve(doc, value)))
}

fn rect(value: &Object) -> Option<[f32; 4]> {
    let array = value.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }
    Some([
        array[0].as_float().ok()?,
        array[1].as_float().ok()?,
        array[2].as_float().ok()?,
        array[3].as_float().ok()?,
    ])
}

fn rect_object(values: [f32; 4]) -> Object {
    Object::Array(values.iter().map(|v| Object::Real(*v)).collect())
}

/// Encode `text` for a simple font using WinAnsiEncoding, `None` if any
/// character has no code in that encoding
fn encode_win_ansi(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => Some(c as u8),
            _ => WIN_ANSI_EXTRAS
                .iter()
                .find(|(candidate, _)| *candidate == c)
                .map(|(_, code)| *code),
        })
        .collect()
}
