//! SCORM package extraction and entry-point resolution.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, warn};
use zip::result::ZipError;

/// Package descriptor at the archive root.
pub const PACKAGE_MANIFEST: &str = "imsmanifest.xml";

/// Conventional entry points, tried in order when the descriptor names none.
pub const FALLBACK_ENTRY_POINTS: [&str; 5] = [
    "index.html",
    "index.htm",
    "main.html",
    "content.html",
    "start.html",
];

/// Unpack a ZIP archive into `dir`. Entries escaping `dir` are rejected by
/// the archive reader.
pub fn extract(bytes: &[u8], dir: &Path) -> Result<usize, ZipError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let entries = archive.len();
    archive.extract(dir)?;
    debug!(entries, dir = %dir.display(), "extracted package");
    Ok(entries)
}

/// Locate the HTML page to render inside an extracted package.
///
/// The descriptor's first `<resource href>` naming an existing HTML file
/// wins; otherwise the first existing conventional name. `None` means the
/// package has no renderable entry point.
pub fn resolve_entry_point(dir: &Path) -> Option<PathBuf> {
    let descriptor = dir.join(PACKAGE_MANIFEST);
    if descriptor.is_file() {
        match std::fs::read(&descriptor) {
            Ok(bytes) => {
                let xml = String::from_utf8_lossy(&bytes);
                let xml = xml.trim_start_matches('\u{feff}');
                for href in resource_hrefs(xml) {
                    if let Some(path) = contained_html(dir, &href) {
                        debug!(entry = %path.display(), "entry point from package descriptor");
                        return Some(path);
                    }
                }
            }
            Err(e) => warn!(path = %descriptor.display(), error = %e, "unreadable package descriptor"),
        }
    }

    FALLBACK_ENTRY_POINTS
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .inspect(|path| debug!(entry = %path.display(), "entry point from conventional name"))
}

/// `href` attributes of `<resource>` elements, in document order. A parse
/// error ends the scan but keeps what was found before it.
fn resource_hrefs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut hrefs = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() != b"resource" {
                    continue;
                }
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"href" {
                        if let Ok(value) = attr.unescape_value() {
                            hrefs.push(value.into_owned());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "malformed package descriptor");
                break;
            }
            _ => {}
        }
    }
    hrefs
}

/// Resolve `href` inside `dir` if it names an existing HTML file without
/// leaving the directory.
fn contained_html(dir: &Path, href: &str) -> Option<PathBuf> {
    let relative = href.split(['?', '#']).next()?.trim();
    let lower = relative.to_ascii_lowercase();
    if !(lower.ends_with(".html") || lower.ends_with(".htm")) {
        return None;
    }

    let relative = Path::new(relative);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        debug!(href, "ignoring entry point outside the package");
        return None;
    }

    let path = dir.join(relative);
    path.is_file().then_some(path)
}
