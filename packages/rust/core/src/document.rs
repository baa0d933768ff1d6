//! PDF primitives: artifact validation, merging with an outline, and reading
//! a merged document back for verification.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use coursepack_shared::{CoursepackError, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat, dictionary};
use tracing::{debug, instrument};

use crate::outline::OutlineNode;

/// The header may be preceded by junk; readers accept it within the first KiB.
const HEADER_WINDOW: usize = 1024;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Why bytes are not a usable single-document artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPdf {
    #[error("file is empty")]
    Empty,
    #[error("missing %PDF- header")]
    NotPdf,
    #[error("unreadable PDF: {0}")]
    Unreadable(String),
    #[error("document has no pages")]
    NoPages,
}

/// Parse `bytes` as a PDF with at least one page.
pub fn load_pdf(bytes: &[u8]) -> std::result::Result<Document, InvalidPdf> {
    if bytes.is_empty() {
        return Err(InvalidPdf::Empty);
    }
    let window = &bytes[..bytes.len().min(HEADER_WINDOW)];
    if !window.windows(5).any(|w| w == b"%PDF-") {
        return Err(InvalidPdf::NotPdf);
    }
    let document = Document::load_mem(bytes).map_err(|e| InvalidPdf::Unreadable(e.to_string()))?;
    if document.get_pages().is_empty() {
        return Err(InvalidPdf::NoPages);
    }
    Ok(document)
}

fn pdf_error(context: &str, e: lopdf::Error) -> CoursepackError {
    CoursepackError::Pdf(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// PdfMerger
// ---------------------------------------------------------------------------

/// Concatenates documents page by page into a fresh document.
pub struct PdfMerger {
    document: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfMerger {
    pub fn new() -> Self {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        Self {
            document,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    /// Pages appended so far.
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Append every page of `source`, in order. Returns the number of pages added.
    pub fn append(&mut self, mut source: Document) -> Result<usize> {
        source.renumber_objects_with(self.document.max_id + 1);

        let pages: Vec<ObjectId> = source.get_pages().into_values().collect();
        for &page_id in &pages {
            let inherited = inherited_attributes(&source, page_id);
            let page = source
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| pdf_error("page is not a dictionary", e))?;
            for (key, value) in inherited {
                if !page.has(&key) {
                    page.set(key, value);
                }
            }
            page.set("Parent", self.pages_id);
        }

        self.document.max_id = self.document.max_id.max(source.max_id);
        for (id, object) in source.objects {
            if is_tree_root(&object) {
                continue;
            }
            self.document.objects.insert(id, object);
        }

        self.page_ids.extend_from_slice(&pages);
        Ok(pages.len())
    }

    /// Build the page tree, catalog and outline, and return the document.
    pub fn finish(mut self, outline: &[OutlineNode]) -> Result<Document> {
        let kids: Vec<Object> = self.page_ids.iter().map(|&id| Object::Reference(id)).collect();
        self.document.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        };
        if !outline.is_empty() {
            let outlines_id = self.document.new_object_id();
            let (first, last, count) =
                write_outline_level(&mut self.document, outline, outlines_id, &self.page_ids)?;
            self.document.objects.insert(
                outlines_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Outlines",
                    "First" => first,
                    "Last" => last,
                    "Count" => count,
                }),
            );
            catalog.set("Outlines", outlines_id);
            catalog.set("PageMode", "UseOutlines");
        }

        let catalog_id = self.document.add_object(catalog);
        self.document.trailer.set("Root", catalog_id);

        let pruned = self.document.prune_objects();
        debug!(pruned = pruned.len(), pages = self.page_ids.len(), "merged document finished");
        Ok(self.document)
    }
}

fn is_tree_root(object: &Object) -> bool {
    let Object::Dictionary(dict) = object else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog") | Ok(b"Pages")
    )
}

/// Attributes found on the page's ancestors, nearest first.
fn inherited_attributes(document: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let mut found: Vec<(Vec<u8>, Object)> = Vec::new();
    let mut seen = HashSet::new();
    let mut current = document
        .get_dictionary(page_id)
        .ok()
        .and_then(|d| d.get(b"Parent").and_then(Object::as_reference).ok());

    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        let Ok(node) = document.get_dictionary(id) else {
            break;
        };
        for key in INHERITABLE {
            if found.iter().any(|(k, _)| k.as_slice() == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key.to_vec(), value.clone()));
            }
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    found
}

/// Write one outline level; returns `(first, last, visible descendants)`.
fn write_outline_level(
    document: &mut Document,
    nodes: &[OutlineNode],
    parent: ObjectId,
    page_ids: &[ObjectId],
) -> Result<(ObjectId, ObjectId, i64)> {
    let ids: Vec<ObjectId> = nodes.iter().map(|_| document.new_object_id()).collect();
    let mut visible = nodes.len() as i64;

    for (i, node) in nodes.iter().enumerate() {
        let page = page_ids.get(node.page).copied().ok_or_else(|| {
            CoursepackError::Pdf(format!(
                "bookmark '{}' targets page {} of {}",
                node.title,
                node.page,
                page_ids.len()
            ))
        })?;

        let mut item = dictionary! {
            "Title" => text_string(&node.title),
            "Parent" => parent,
            "Dest" => vec![Object::Reference(page), Object::Name(b"Fit".to_vec())],
        };
        if i > 0 {
            item.set("Prev", ids[i - 1]);
        }
        if let Some(&next) = ids.get(i + 1) {
            item.set("Next", next);
        }
        if !node.children.is_empty() {
            let (first, last, count) = write_outline_level(document, &node.children, ids[i], page_ids)?;
            item.set("First", first);
            item.set("Last", last);
            item.set("Count", count);
            visible += count;
        }
        document.objects.insert(ids[i], Object::Dictionary(item));
    }

    Ok((ids[0], ids[ids.len() - 1], visible))
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        // PDFDocEncoding agrees with Latin-1 on everything we emit.
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Write `document` to `path` through a temporary sibling.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn save_atomic(document: &mut Document, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CoursepackError::io(parent, e))?;
    }

    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .map_err(|e| CoursepackError::Pdf(format!("serializing merged document: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp, &bytes).map_err(|e| CoursepackError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| CoursepackError::io(path, e))?;

    debug!(bytes = bytes.len(), "document saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A bookmark read back from a document. `page` is `None` when the
/// destination is named or points outside the page tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub title: String,
    pub page: Option<usize>,
    pub children: Vec<Bookmark>,
}

/// Open a document from disk for inspection.
pub fn open(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|e| CoursepackError::io(path, e))?;
    Document::load_mem(&bytes).map_err(|e| pdf_error(&path.display().to_string(), e))
}

/// The document's outline as a tree. A document without outlines yields an
/// empty tree; a broken outline is an error.
pub fn read_outline(document: &Document) -> Result<Vec<Bookmark>> {
    let page_index: HashMap<ObjectId, usize> = document
        .get_pages()
        .into_values()
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect();

    let root_id = document
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| pdf_error("trailer has no catalog", e))?;
    let catalog = document
        .get_dictionary(root_id)
        .map_err(|e| pdf_error("catalog", e))?;

    let Ok(outlines) = catalog.get(b"Outlines") else {
        return Ok(Vec::new());
    };
    let outlines = resolve_dict(document, outlines).map_err(|e| pdf_error("outline root", e))?;

    let mut visited = HashSet::new();
    read_level(document, outlines, &page_index, &mut visited)
}

fn read_level(
    document: &Document,
    parent: &Dictionary,
    page_index: &HashMap<ObjectId, usize>,
    visited: &mut HashSet<ObjectId>,
) -> Result<Vec<Bookmark>> {
    let mut items = Vec::new();
    let mut next = parent.get(b"First").and_then(Object::as_reference).ok();

    while let Some(id) = next {
        if !visited.insert(id) {
            return Err(CoursepackError::Pdf(format!(
                "outline item {} {} is linked more than once",
                id.0, id.1
            )));
        }
        let item = document
            .get_dictionary(id)
            .map_err(|e| pdf_error("outline item", e))?;

        let title = item
            .get(b"Title")
            .and_then(|t| document.dereference(t))
            .and_then(|(_, t)| t.as_str())
            .map(decode_text_string)
            .unwrap_or_default();

        items.push(Bookmark {
            title,
            page: destination_page(document, item, page_index),
            children: read_level(document, item, page_index, visited)?,
        });
        next = item.get(b"Next").and_then(Object::as_reference).ok();
    }

    Ok(items)
}

fn destination_page(
    document: &Document,
    item: &Dictionary,
    page_index: &HashMap<ObjectId, usize>,
) -> Option<usize> {
    let dest = match item.get(b"Dest") {
        Ok(dest) => dest,
        Err(_) => {
            let action = resolve_dict(document, item.get(b"A").ok()?).ok()?;
            action.get(b"D").ok()?
        }
    };
    let (_, dest) = document.dereference(dest).ok()?;
    let target = dest.as_array().ok()?.first()?.as_reference().ok()?;
    page_index.get(&target).copied()
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> lopdf::Result<&'a Dictionary> {
    let (_, object) = document.dereference(object)?;
    object.as_dict()
}

/// Number of non-whitespace characters extracted from each requested
/// 0-based page. Pages whose text cannot be extracted map to `None`.
pub fn text_lengths(document: &Document, pages: &[usize]) -> BTreeMap<usize, Option<usize>> {
    pages
        .iter()
        .map(|&index| {
            let length = document
                .extract_text(&[index as u32 + 1])
                .ok()
                .map(|text| text.chars().filter(|c| !c.is_whitespace()).count());
            (index, length)
        })
        .collect()
}
