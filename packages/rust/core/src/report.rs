//! QA report output: the JSON report and a plain HTML summary page.

use std::fmt::Write as _;
use std::path::Path;

use coursepack_shared::{CoursepackError, Result};
use html_escape::encode_text;
use tracing::{debug, instrument};

use crate::verifier::{CheckResult, QaReport};

const STYLE: &str = "\
body{font-family:sans-serif;margin:2rem;color:#222}\
.check{border-left:6px solid;padding:.5rem 1rem;margin:.75rem 0;background:#fafafa}\
.passed{border-color:#2e7d32}.failed{border-color:#c62828}.skipped{border-color:#9e9e9e}\
.status{font-weight:bold;text-transform:uppercase;font-size:.8rem}\
table{border-collapse:collapse;margin-top:.5rem}td{padding:.1rem .75rem .1rem 0}";

/// Write `<json_path>` and `<html_path>`.
#[instrument(skip_all, fields(subject = %report.subject))]
pub fn write_reports(report: &QaReport, json_path: &Path, html_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| CoursepackError::validation(format!("JSON serialization failed: {e}")))?;
    write_file(json_path, json.as_bytes())?;
    write_file(html_path, render_html(report).as_bytes())?;
    debug!(json = %json_path.display(), html = %html_path.display(), "reports written");
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CoursepackError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| CoursepackError::io(path, e))
}

/// One card per check, in execution order.
pub fn render_html(report: &QaReport) -> String {
    let mut html = String::new();
    let title = format!("QA report: {}", encode_text(&report.subject));

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n\
         <p>Document: <code>{}</code><br>Generated: {}</p>\n",
        encode_text(&report.pdf_file),
        report.generated_at.to_rfc3339(),
    );

    for check in &report.checks {
        render_check(&mut html, check);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_check(html: &mut String, check: &CheckResult) {
    let status = if check.skipped {
        "skipped"
    } else if check.passed {
        "passed"
    } else {
        "failed"
    };

    let _ = write!(
        html,
        "<div class=\"check {status}\">\n<h2>{}</h2>\n<span class=\"status\">{status}</span>\n<p>{}</p>\n",
        encode_text(check.name),
        encode_text(&check.message),
    );
    if !check.metrics.is_empty() {
        html.push_str("<table>\n");
        for (key, value) in &check.metrics {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td></tr>",
                encode_text(key),
                encode_text(&value.to_string())
            );
        }
        html.push_str("</table>\n");
    }
    html.push_str("</div>\n");
}
