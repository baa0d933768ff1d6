//! Print layout.
//!
//! Chrome's command-line printing has no page-size or margin switches, so
//! every page is printed from a local copy carrying an `@page` rule. Local
//! entry points get a sibling copy, which keeps relative links resolving.
//! Remote pages are printed from a snapshot of their rendered DOM with a
//! `<base>` pointing back at the origin and scripts switched off, so the
//! snapshot prints exactly as it was captured.

use std::path::{Path, PathBuf};

use coursepack_shared::RenderConfig;
use html_escape::encode_double_quoted_attribute;

use crate::RenderError;

const NEEDLE: &[u8] = b"</head";
const HEAD_OPEN: &[u8] = b"<head";

/// Keeps a captured DOM from running its scripts a second time.
const FROZEN_POLICY: &str =
    r#"<meta http-equiv="Content-Security-Policy" content="script-src 'none'">"#;

/// `<style>` block carrying the configured paper size, margins and
/// background policy.
pub(crate) fn stylesheet(config: &RenderConfig) -> String {
    let m = &config.margins_mm;
    let mut css = format!(
        "@page {{ size: {}; margin: {}mm {}mm {}mm {}mm; }}",
        config.page_size, m.top, m.right, m.bottom, m.left
    );
    if config.print_background {
        css.push_str(" html { -webkit-print-color-adjust: exact; print-color-adjust: exact; }");
    }
    format!("<style data-coursepack=\"print\">{css}</style>")
}

/// Insert `block` before the first `</head` (any case). Documents without a
/// head get the block prepended, which browsers still honour.
pub(crate) fn inject(html: &[u8], block: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(html.len() + block.len());
    match html
        .windows(NEEDLE.len())
        .position(|w| w.eq_ignore_ascii_case(NEEDLE))
    {
        Some(pos) => {
            out.extend_from_slice(&html[..pos]);
            out.extend_from_slice(block.as_bytes());
            out.extend_from_slice(&html[pos..]);
        }
        None => {
            tracing::debug!("closing head tag not found; prepending print stylesheet");
            out.extend_from_slice(block.as_bytes());
            out.extend_from_slice(html);
        }
    }
    out
}

/// `<base>` tag resolving relative references against `url`.
pub(crate) fn base_tag(url: &str) -> String {
    format!(r#"<base href="{}">"#, encode_double_quoted_attribute(url))
}

/// Offset just past the opening `<head ...>` tag, if there is one.
/// `<header>` and friends do not count.
fn head_open_end(html: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = html[from..]
        .windows(HEAD_OPEN.len())
        .position(|w| w.eq_ignore_ascii_case(HEAD_OPEN))
    {
        let after = from + offset + HEAD_OPEN.len();
        match html.get(after) {
            Some(b'>') => return Some(after + 1),
            Some(b) if b.is_ascii_whitespace() || *b == b'/' => {
                return html[after..]
                    .iter()
                    .position(|&b| b == b'>')
                    .map(|p| after + p + 1);
            }
            _ => from = after,
        }
    }
    None
}

/// Insert `block` as the first thing inside `<head>`, or prepend it when
/// the document has no head.
pub(crate) fn inject_after_head_open(html: &[u8], block: &str) -> Vec<u8> {
    let pos = head_open_end(html).unwrap_or(0);
    let mut out = Vec::with_capacity(html.len() + block.len());
    out.extend_from_slice(&html[..pos]);
    out.extend_from_slice(block.as_bytes());
    out.extend_from_slice(&html[pos..]);
    out
}

/// Write a printable snapshot of the DOM captured from `url` to `path`.
pub(crate) fn write_snapshot(
    dom: &str,
    url: &str,
    path: &Path,
    config: &RenderConfig,
) -> Result<(), RenderError> {
    let head = format!("{FROZEN_POLICY}{}", base_tag(url));
    let html = inject_after_head_open(dom.as_bytes(), &head);
    let html = inject(&html, &stylesheet(config));
    std::fs::write(path, html).map_err(|e| RenderError::io(path, e))
}

/// Write `<stem>.print.html` next to `entry` with the stylesheet injected.
pub(crate) fn prepare_local(entry: &Path, config: &RenderConfig) -> Result<PathBuf, RenderError> {
    let html = std::fs::read(entry).map_err(|e| RenderError::io(entry, e))?;
    let stem = entry
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let copy = entry.with_file_name(format!("{stem}.print.html"));

    std::fs::write(&copy, inject(&html, &stylesheet(config)))
        .map_err(|e| RenderError::io(&copy, e))?;
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stylesheet_reflects_configuration() {
        let css = stylesheet(&RenderConfig::default());
        assert!(css.contains("size: A4"));
        assert!(css.contains("margin: 12mm 10mm 12mm 10mm"));
        assert!(css.contains("print-color-adjust: exact"));

        let plain = RenderConfig {
            print_background: false,
            ..RenderConfig::default()
        };
        assert!(!stylesheet(&plain).contains("print-color-adjust"));
    }

    #[test]
    fn inject_before_head_close_case_insensitive() {
        let out = inject(b"<html><HEAD><title>t</title></HEAD><body></body></html>", "<style>x</style>");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<html><HEAD><title>t</title><style>x</style></HEAD><body></body></html>"
        );
    }

    #[test]
    fn inject_without_head_prepends() {
        let out = inject(b"<p>hola</p>", "<style>x</style>");
        assert_eq!(out, b"<style>x</style><p>hola</p>");
    }

    #[test]
    fn inject_preserves_non_utf8_bytes() {
        // ISO-8859-1 "á" is a lone 0xE1 byte.
        let html = b"<html><head></head><body>m\xE1s</body></html>";
        let out = inject(html, "<style></style>");
        assert!(out.windows(4).any(|w| w == b"m\xE1s<"));
    }

    #[test]
    fn base_tag_escapes_the_url() {
        assert_eq!(
            base_tag(r#"https://agrega.example.es/visualizar?id=1&x="y""#),
            r#"<base href="https://agrega.example.es/visualizar?id=1&amp;x=&quot;y&quot;">"#
        );
    }

    #[test]
    fn head_open_skips_header_elements() {
        let out = inject_after_head_open(
            b"<html><head lang=\"es\"><title>t</title></head><body><header>h</header></body></html>",
            "<base>",
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<html><head lang=\"es\"><base><title>t</title></head><body><header>h</header></body></html>"
        );

        let out = inject_after_head_open(b"<body><header>h</header></body>", "<base>");
        assert_eq!(out, b"<base><body><header>h</header></body>");
    }

    #[test]
    fn snapshot_carries_page_setup_and_origin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.print.html");
        let dom = r#"<html><head><link rel="stylesheet" href="css/tema.css"></head><body><script src="mathjax.js"></script><p>x</p></body></html>"#;
        let config = RenderConfig {
            page_size: "Letter".into(),
            ..RenderConfig::default()
        };

        write_snapshot(dom, "https://recursos.example.org/tema1/", &path, &config).unwrap();
        let html = std::fs::read_to_string(&path).unwrap();

        let base = html.find(r#"<base href="https://recursos.example.org/tema1/">"#).unwrap();
        let policy = html.find("script-src 'none'").unwrap();
        let link = html.find("<link").unwrap();
        let page = html.find("@page { size: Letter; margin: 12mm 10mm 12mm 10mm; }").unwrap();
        let head_close = html.find("</head>").unwrap();
        assert!(policy < link && base < link);
        assert!(link < page && page < head_close);
    }

    #[test]
    fn prepare_local_writes_sibling_copy() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("index.html");
        std::fs::write(&entry, "<html><head></head><body>x</body></html>").unwrap();

        let copy = prepare_local(&entry, &RenderConfig::default()).unwrap();
        assert_eq!(copy, dir.path().join("index.print.html"));
        let content = std::fs::read_to_string(&copy).unwrap();
        assert!(content.contains("@page"));
        assert_eq!(
            std::fs::read_to_string(&entry).unwrap(),
            "<html><head></head><body>x</body></html>",
            "original entry point is untouched"
        );
    }
}
