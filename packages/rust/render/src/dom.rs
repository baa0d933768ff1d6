//! Inspection of a rendered DOM snapshot: math typesetting state and
//! visible body text.

use scraper::{ElementRef, Html, Node, Selector};

use crate::TypesetStatus;

/// Elements whose text never reaches the printed page.
const INVISIBLE: [&str; 4] = ["script", "style", "noscript", "template"];

/// Markers left behind once MathJax has typeset a formula (v2 and v3).
const TYPESET_OUTPUT: &str =
    "mjx-container, .MathJax, .MathJax_Display, .MathJax_CHTML, .MathJax_SVG, .MathJax_SVG_Display";

/// TeX delimiters that survive only while math is still untypeset.
const RAW_DELIMITERS: [&str; 3] = ["\\(", "\\[", "$$"];

/// Classify the typesetting state of a serialized DOM.
pub(crate) fn typeset_status(dom: &str) -> TypesetStatus {
    let document = Html::parse_document(dom);

    if !uses_mathjax(&document) {
        return TypesetStatus::NotPresent;
    }

    if still_processing(&document) {
        return TypesetStatus::Incomplete;
    }

    let text = body_text(&document).unwrap_or_default();
    if RAW_DELIMITERS.iter().any(|d| text.contains(d)) {
        return TypesetStatus::Incomplete;
    }

    TypesetStatus::Complete
}

/// Whitespace-normalized visible text of the `<body>`.
pub(crate) fn visible_text(dom: &str) -> Option<String> {
    let document = Html::parse_document(dom);
    let text = body_text(&document)?;
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn uses_mathjax(document: &Html) -> bool {
    let Ok(scripts) = Selector::parse("script") else {
        return false;
    };
    let has_loader = document.select(&scripts).any(|script| {
        let from_src = script
            .value()
            .attr("src")
            .is_some_and(|src| src.to_ascii_lowercase().contains("mathjax"));
        let inline_config = script.text().any(|t| t.contains("MathJax"));
        from_src || inline_config
    });

    has_loader || has_typeset_output(document)
}

fn has_typeset_output(document: &Html) -> bool {
    Selector::parse(TYPESET_OUTPUT)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

/// MathJax 2 shows a status bubble while it loads or processes.
fn still_processing(document: &Html) -> bool {
    let Ok(message) = Selector::parse("#MathJax_Message") else {
        return false;
    };
    document.select(&message).any(|el| {
        let hidden = el
            .value()
            .attr("style")
            .is_some_and(|s| s.replace(' ', "").contains("display:none"));
        let text: String = el.text().collect();
        let text = text.trim();
        !hidden && (text.starts_with("Loading") || text.starts_with("Processing"))
    })
}

fn body_text(document: &Html) -> Option<String> {
    let selector = Selector::parse("body").ok()?;
    let body = document.select(&selector).next()?;
    Some(collect_text(body))
}

fn collect_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| INVISIBLE.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_without_math_is_not_present() {
        let dom = "<html><head></head><body><p>Hola</p></body></html>";
        assert_eq!(typeset_status(dom), TypesetStatus::NotPresent);
    }

    #[test]
    fn typeset_v3_output_is_complete() {
        let dom = r#"<html><head><script src="https://cdn.example.org/mathjax/tex-chtml.js"></script></head>
            <body><p>Sea <mjx-container class="MathJax">x</mjx-container> un número.</p></body></html>"#;
        assert_eq!(typeset_status(dom), TypesetStatus::Complete);
    }

    #[test]
    fn raw_delimiters_mean_incomplete() {
        let dom = r#"<html><head><script src="/js/MathJax.js?config=TeX-AMS_HTML"></script></head>
            <body><p>Resolver \( x^2 = 4 \)</p></body></html>"#;
        assert_eq!(typeset_status(dom), TypesetStatus::Incomplete);
    }

    #[test]
    fn delimiters_inside_scripts_are_ignored() {
        let dom = r#"<html><head><script src="/mathjax/startup.js"></script></head>
            <body><script>MathJax = { tex: { inlineMath: [['\\(', '\\)']] } };</script>
            <span class="MathJax_CHTML">x</span></body></html>"#;
        assert_eq!(typeset_status(dom), TypesetStatus::Complete);
    }

    #[test]
    fn visible_processing_message_is_incomplete() {
        let dom = r#"<html><head><script src="/MathJax.js"></script></head>
            <body><div id="MathJax_Message">Processing math: 40%</div></body></html>"#;
        assert_eq!(typeset_status(dom), TypesetStatus::Incomplete);

        let hidden = r#"<html><head><script src="/MathJax.js"></script></head>
            <body><div id="MathJax_Message" style="display: none">Processing math: 100%</div></body></html>"#;
        assert_eq!(typeset_status(hidden), TypesetStatus::Complete);
    }

    #[test]
    fn visible_text_skips_scripts_and_normalizes() {
        let dom = "<html><head><title>t</title></head><body>\n  <h1>Tema 1</h1>\
            <script>var x = 1;</script><style>p{}</style><p>Los   números\nreales</p></body></html>";
        assert_eq!(visible_text(dom).as_deref(), Some("Tema 1 Los números reales"));
    }

    #[test]
    fn empty_body_has_no_text() {
        assert_eq!(visible_text("<html><body>  </body></html>"), None);
    }
}
