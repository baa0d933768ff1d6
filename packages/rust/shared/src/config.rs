//! Application configuration for coursepack.
//!
//! User config lives at `~/.coursepack/coursepack.toml`.
//! CLI flags override config file values, which override defaults.
//! A [`PipelineContext`] is derived once per invocation and passed by
//! reference to every stage.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoursepackError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "coursepack.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".coursepack";

/// Subject names become path components.
const SUBJECT_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";

// ---------------------------------------------------------------------------
// Config structs (matching coursepack.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem roots.
    #[serde(default)]
    pub paths: PathsConfig,

    /// HTTP retrieval settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Browser rendering settings.
    #[serde(default)]
    pub render: RenderConfig,

    /// Merged document settings.
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `manifest_<subject>.json` files.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: String,

    /// Root of the position-addressed cache.
    #[serde(default = "default_temp_root")]
    pub temp_root: String,

    /// Where merged documents are written.
    #[serde(default = "default_final_root")]
    pub final_root: String,

    /// Where render diagnostics and text dumps are written.
    #[serde(default = "default_dumps_root")]
    pub dumps_root: String,

    /// Where QA reports are written.
    #[serde(default = "default_reports_root")]
    pub reports_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manifest_dir: default_manifest_dir(),
            temp_root: default_temp_root(),
            final_root: default_final_root(),
            dumps_root: default_dumps_root(),
            reports_root: default_reports_root(),
        }
    }
}

fn default_manifest_dir() -> String {
    ".".into()
}
fn default_temp_root() -> String {
    "/tmp/coursepack".into()
}
fn default_final_root() -> String {
    "final".into()
}
fn default_dumps_root() -> String {
    "raw_dumps".into()
}
fn default_reports_root() -> String {
    ".".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional Referer header (some repositories refuse downloads without one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Total attempts for transient failures (1 disables retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep before each retry, in seconds; the last value repeats.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: Vec<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            referer: None,
            timeout_secs: default_fetch_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let index = (retry.saturating_sub(1) as usize).min(self.retry_backoff_secs.len().saturating_sub(1));
        Duration::from_secs(self.retry_backoff_secs.get(index).copied().unwrap_or(0))
    }
}

fn default_user_agent() -> String {
    concat!("coursepack/", env!("CARGO_PKG_VERSION")).into()
}
fn default_fetch_timeout() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> Vec<u64> {
    vec![2, 8]
}

/// `[render]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Explicit Chrome/Chromium binary; discovered on `PATH` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<String>,

    /// CSS page size used for printing (e.g. `A4`, `Letter`).
    #[serde(default = "default_page_size")]
    pub page_size: String,

    /// Print CSS backgrounds.
    #[serde(default = "default_true")]
    pub print_background: bool,

    /// Hard limit for a single browser invocation, in seconds.
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,

    /// Budget for in-page typesetting (MathJax) before capture, in milliseconds.
    #[serde(default = "default_typeset_timeout")]
    pub typeset_timeout_ms: u64,

    /// Viewport width in pixels.
    #[serde(default = "default_window_width")]
    pub window_width: u32,

    /// Viewport height in pixels.
    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Page margins in millimetres.
    #[serde(default)]
    pub margins_mm: MarginsConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            page_size: default_page_size(),
            print_background: true,
            timeout_secs: default_render_timeout(),
            typeset_timeout_ms: default_typeset_timeout(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            margins_mm: MarginsConfig::default(),
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[render.margins_mm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginsConfig {
    #[serde(default = "default_vertical_margin")]
    pub top: f32,
    #[serde(default = "default_vertical_margin")]
    pub bottom: f32,
    #[serde(default = "default_horizontal_margin")]
    pub left: f32,
    #[serde(default = "default_horizontal_margin")]
    pub right: f32,
}

impl Default for MarginsConfig {
    fn default() -> Self {
        Self {
            top: default_vertical_margin(),
            bottom: default_vertical_margin(),
            left: default_horizontal_margin(),
            right: default_horizontal_margin(),
        }
    }
}

fn default_page_size() -> String {
    "A4".into()
}
fn default_true() -> bool {
    true
}
fn default_render_timeout() -> u64 {
    90
}
fn default_typeset_timeout() -> u64 {
    10_000
}
fn default_window_width() -> u32 {
    1200
}
fn default_window_height() -> u32 {
    800
}
fn default_vertical_margin() -> f32 {
    12.0
}
fn default_horizontal_margin() -> f32 {
    10.0
}

/// `[assembly]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Prefix of the merged document name (`<tag>_<subject>.pdf`).
    #[serde(default = "default_document_tag")]
    pub document_tag: String,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            document_tag: default_document_tag(),
        }
    }
}

fn default_document_tag() -> String {
    "CREA".into()
}

// ---------------------------------------------------------------------------
// PipelineContext (runtime, one per invocation)
// ---------------------------------------------------------------------------

/// Everything a pipeline stage needs to know about one subject.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Subject identifier (validated path component).
    pub subject: String,
    /// `manifest_<subject>.json`.
    pub manifest_path: PathBuf,
    /// `<temp-root>/<subject>`.
    pub cache_dir: PathBuf,
    /// `<final-root>/<tag>_<subject>.pdf`.
    pub merged_document_path: PathBuf,
    /// `<dumps-root>/<subject>`.
    pub dumps_dir: PathBuf,
    /// `<reports-root>/qa_report_<subject>.json`.
    pub report_json_path: PathBuf,
    /// `<reports-root>/qa_report_<subject>.html`.
    pub report_html_path: PathBuf,
    /// HTTP settings.
    pub fetch: FetchConfig,
    /// Browser settings.
    pub render: RenderConfig,
}

impl PipelineContext {
    /// Resolve all per-subject paths from the app config.
    pub fn new(config: &AppConfig, subject: &str) -> Result<Self> {
        validate_subject(subject)?;

        let paths = &config.paths;
        let manifest_dir = expand_path(&paths.manifest_dir);
        let final_root = expand_path(&paths.final_root);
        let reports_root = expand_path(&paths.reports_root);

        Ok(Self {
            subject: subject.to_string(),
            manifest_path: manifest_dir.join(format!("manifest_{subject}.json")),
            cache_dir: expand_path(&paths.temp_root).join(subject),
            merged_document_path: final_root
                .join(format!("{}_{subject}.pdf", config.assembly.document_tag)),
            dumps_dir: expand_path(&paths.dumps_root).join(subject),
            report_json_path: reports_root.join(format!("qa_report_{subject}.json")),
            report_html_path: reports_root.join(format!("qa_report_{subject}.html")),
            fetch: config.fetch.clone(),
            render: config.render.clone(),
        })
    }
}

/// Reject subject names that are not a single safe path component.
pub fn validate_subject(subject: &str) -> Result<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(SUBJECT_PATTERN).expect("valid subject regex"));

    if pattern.is_match(subject) {
        Ok(())
    } else {
        Err(CoursepackError::config(format!(
            "invalid subject name '{subject}': use letters, digits, '_', '-' or '.'"
        )))
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_path(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.coursepack/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CoursepackError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.coursepack/coursepack.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CoursepackError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CoursepackError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CoursepackError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CoursepackError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CoursepackError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
