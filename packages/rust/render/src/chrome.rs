use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use coursepack_shared::RenderConfig;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::{
    DiagnosticPaths, RenderError, RenderReport, RenderRequest, RenderTarget, Renderer,
    TypesetStatus, dom, print,
};

/// A Chrome/Chromium executable.
#[derive(Debug, Clone)]
pub(crate) enum Chrome {
    /// A directly executable binary.
    Binary { path: PathBuf },
    /// A Flatpak-installed application.
    Flatpak { app_id: String },
}

/// Executables looked up on `PATH`, in order of preference.
static EXECUTABLES: [&str; 4] = ["google-chrome", "chromium", "chromium-browser", "chrome"];

/// Flatpak application ids tried when nothing is on `PATH`.
static FLATPAK_APPS: [&str; 2] = ["com.google.Chrome", "org.chromium.Chromium"];

/// Print copy of a remote page, written next to the requested output.
const SNAPSHOT_FILE: &str = "snapshot.print.html";

impl Chrome {
    /// The configured binary when one is set, otherwise the first browser
    /// on `PATH`, otherwise a Flatpak install. The error names what was
    /// tried.
    pub(crate) fn locate(configured: Option<&str>) -> Result<Self, RenderError> {
        if let Some(path) = configured {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Ok(Self::Binary { path });
            }
            return Err(RenderError::ChromeNotFound(format!(
                "render.chrome_path {} is not a file",
                path.display()
            )));
        }

        if let Some(path) = EXECUTABLES.iter().find_map(|exe| which::which(exe).ok()) {
            return Ok(Self::Binary { path });
        }

        debug!("no browser on PATH; checking Flatpak installs");
        let app = which::which("flatpak").ok().and_then(|flatpak| {
            FLATPAK_APPS.iter().find(|app| {
                std::process::Command::new(&flatpak)
                    .args(["info", **app])
                    .output()
                    .is_ok_and(|o| o.status.success())
            })
        });

        match app {
            Some(app_id) => Ok(Self::Flatpak {
                app_id: (*app_id).to_string(),
            }),
            None => Err(RenderError::ChromeNotFound(format!(
                "searched PATH for {} and Flatpak for {}; set render.chrome_path",
                EXECUTABLES.join(", "),
                FLATPAK_APPS.join(", ")
            ))),
        }
    }

    fn command(&self) -> Command {
        match self {
            Self::Binary { path } => Command::new(path),
            Self::Flatpak { app_id } => {
                let mut cmd = Command::new("flatpak");
                cmd.args(["run", "--filesystem=host", app_id]);
                cmd
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChromeRenderer
// ---------------------------------------------------------------------------

/// [`Renderer`] that drives headless Chrome through its command line.
///
/// Each capture is two invocations: a DOM dump (after the typesetting
/// budget) that tells us whether math finished and gives us the text
/// fallback, then the actual print. Every invocation is bounded by
/// `render.timeout_secs` and uses a throwaway profile directory.
///
/// A missing browser is not fatal here: resources that never need one
/// (direct PDFs) still go through, and every render reports
/// [`RenderError::ChromeNotFound`].
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    /// The browser, or why none could be found.
    chrome: Result<Chrome, String>,
    config: RenderConfig,
    user_agent: String,
}

impl ChromeRenderer {
    /// Use `render.chrome_path` when set, otherwise search the system.
    pub fn new(config: &RenderConfig, user_agent: &str) -> Self {
        let chrome = match Chrome::locate(config.chrome_path.as_deref()) {
            Ok(chrome) => {
                debug!(?chrome, "using browser");
                Ok(chrome)
            }
            Err(RenderError::ChromeNotFound(why)) => {
                warn!(reason = %why, "no browser found; resources that need rendering will fail");
                Err(why)
            }
            Err(e) => Err(e.to_string()),
        };

        Self {
            chrome,
            config: config.clone(),
            user_agent: user_agent.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.chrome.is_ok()
    }

    fn chrome(&self) -> Result<&Chrome, RenderError> {
        self.chrome
            .as_ref()
            .map_err(|why| RenderError::ChromeNotFound(why.clone()))
    }

    fn base_args(&self, profile: &Path) -> Vec<OsString> {
        let mut profile_arg = OsString::from("--user-data-dir=");
        profile_arg.push(profile);
        vec![
            "--headless=new".into(),
            "--disable-gpu".into(),
            "--no-sandbox".into(),
            "--disable-dev-shm-usage".into(),
            "--hide-scrollbars".into(),
            "--no-first-run".into(),
            "--no-default-browser-check".into(),
            format!("--user-agent={}", self.user_agent).into(),
            format!(
                "--window-size={},{}",
                self.config.window_width, self.config.window_height
            )
            .into(),
            profile_arg,
        ]
    }

    fn budget_arg(&self) -> OsString {
        format!("--virtual-time-budget={}", self.config.typeset_timeout_ms).into()
    }

    fn dump_dom_args(&self, url: &str) -> Vec<OsString> {
        vec!["--dump-dom".into(), self.budget_arg(), url.into()]
    }

    fn print_args(&self, url: &str, output: &Path) -> Vec<OsString> {
        let mut out_arg = OsString::from("--print-to-pdf=");
        out_arg.push(output);
        vec![
            "--no-pdf-header-footer".into(),
            "--run-all-compositor-stages-before-draw".into(),
            self.budget_arg(),
            out_arg,
            url.into(),
        ]
    }

    fn screenshot_args(&self, url: &str, output: &Path) -> Vec<OsString> {
        let mut out_arg = OsString::from("--screenshot=");
        out_arg.push(output);
        vec![self.budget_arg(), out_arg, url.into()]
    }

    /// Run one browser invocation under the configured time limit. The child
    /// is killed if the limit expires.
    async fn run(&self, args: Vec<OsString>) -> Result<Output, RenderError> {
        let chrome = self.chrome()?;
        let profile = tempfile::tempdir().map_err(|e| RenderError::io(std::env::temp_dir(), e))?;

        let mut cmd = chrome.command();
        cmd.args(self.base_args(profile.path()))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| RenderError::io(PathBuf::from("chrome"), e))?;

        let output = match tokio::time::timeout(self.config.timeout(), child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| RenderError::io(PathBuf::from("chrome"), e))?,
            Err(_) => {
                return Err(RenderError::Timeout {
                    secs: self.config.timeout_secs,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::ChromeFailed {
                code: output.status.code(),
                stderr: last_lines(&stderr, 5),
            });
        }
        Ok(output)
    }

    /// URL Chrome should load; local pages are swapped for their print copy.
    fn resolve(&self, target: &RenderTarget) -> Result<String, RenderError> {
        match target {
            RenderTarget::Url(url) => Ok(url.clone()),
            RenderTarget::File(entry) => {
                let copy = print::prepare_local(entry, &self.config)?;
                file_url(&copy)
            }
        }
    }

    /// URL to print from. Remote pages go through a snapshot of `dom` so
    /// the configured page setup applies; without one they print as-is.
    fn print_url(
        &self,
        target: &RenderTarget,
        loaded: &str,
        dom: Option<&str>,
        output: &Path,
    ) -> Result<String, RenderError> {
        match (target, dom) {
            (RenderTarget::Url(remote), Some(dom)) => {
                let snapshot = output.with_file_name(SNAPSHOT_FILE);
                print::write_snapshot(dom, remote, &snapshot, &self.config)?;
                file_url(&snapshot)
            }
            (RenderTarget::Url(_), None) => {
                warn!("no DOM snapshot; printing the live page with the browser's page setup");
                Ok(loaded.to_string())
            }
            (RenderTarget::File(_), _) => Ok(loaded.to_string()),
        }
    }
}

impl Renderer for ChromeRenderer {
    #[instrument(skip_all, fields(target = %request.target))]
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderReport, RenderError> {
        let url = self.resolve(request.target)?;

        let (typeset, dom) = match self.run(self.dump_dom_args(&url)).await {
            Ok(output) => {
                let dom = String::from_utf8_lossy(&output.stdout).into_owned();
                (dom::typeset_status(&dom), Some(dom))
            }
            Err(RenderError::Timeout { secs }) => {
                warn!(secs, "DOM snapshot timed out; printing without typeset confirmation");
                (TypesetStatus::Incomplete, None)
            }
            Err(e) => return Err(e),
        };
        let text = dom.as_deref().and_then(dom::visible_text);

        if typeset == TypesetStatus::Incomplete {
            warn!("math typesetting did not finish before capture");
        }

        let print_url = self.print_url(request.target, &url, dom.as_deref(), request.output)?;
        self.run(self.print_args(&print_url, request.output)).await?;

        let written = std::fs::metadata(request.output)
            .map(|m| m.len())
            .unwrap_or(0);
        if written == 0 {
            return Err(RenderError::NoOutput(request.output.to_path_buf()));
        }

        debug!(bytes = written, ?typeset, "printed");
        Ok(RenderReport { typeset, text })
    }

    #[instrument(skip_all, fields(target = %target))]
    async fn capture_diagnostics(
        &self,
        target: &RenderTarget,
        paths: &DiagnosticPaths,
    ) -> Result<(), RenderError> {
        let url = match target {
            RenderTarget::Url(url) => url.clone(),
            RenderTarget::File(entry) => file_url(entry)?,
        };

        let screenshot = self
            .run(self.screenshot_args(&url, &paths.screenshot))
            .await
            .map(|_| ());
        if let Err(e) = &screenshot {
            warn!(error = %e, "screenshot capture failed");
        }

        let content = match self.run(self.dump_dom_args(&url)).await {
            Ok(output) => std::fs::write(&paths.content, &output.stdout)
                .map_err(|e| RenderError::io(&paths.content, e)),
            Err(e) => Err(e),
        };
        if let Err(e) = &content {
            warn!(error = %e, "content dump failed");
        }

        screenshot.and(content)
    }
}

fn file_url(path: &Path) -> Result<String, RenderError> {
    let absolute = std::path::absolute(path).map_err(|e| RenderError::io(path, e))?;
    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|()| RenderError::InvalidTarget(absolute.display().to_string()))
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> ChromeRenderer {
        ChromeRenderer {
            chrome: Ok(Chrome::Binary {
                path: PathBuf::from("/usr/bin/chromium"),
            }),
            config: RenderConfig::default(),
            user_agent: "coursepack-test".into(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn print_args_target_output_file() {
        let args = strings(renderer().print_args("https://example.org/a", Path::new("/tmp/x/render.pdf")));
        assert!(args.contains(&"--print-to-pdf=/tmp/x/render.pdf".to_string()));
        assert!(args.contains(&"--no-pdf-header-footer".to_string()));
        assert!(args.contains(&"--virtual-time-budget=10000".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.org/a"));
    }

    #[test]
    fn base_args_carry_identity_and_viewport() {
        let args = strings(renderer().base_args(Path::new("/tmp/profile")));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--user-agent=coursepack-test".to_string()));
        assert!(args.contains(&"--window-size=1200,800".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
    }

    #[test]
    fn file_targets_become_file_urls() {
        let url = file_url(Path::new("/tmp/course/index.html")).unwrap();
        assert_eq!(url, "file:///tmp/course/index.html");
    }

    #[tokio::test]
    async fn missing_configured_binary_fails_each_render() {
        let config = RenderConfig {
            chrome_path: Some("/nonexistent/chrome".into()),
            ..RenderConfig::default()
        };
        let renderer = ChromeRenderer::new(&config, "ua");
        assert!(!renderer.is_available());

        let dir = tempfile::tempdir().unwrap();
        let target = RenderTarget::Url("https://recursos.example.org/tema1".into());
        let output = dir.path().join("render.pdf");
        let err = renderer
            .render(&RenderRequest {
                target: &target,
                output: &output,
            })
            .await
            .unwrap_err();
        match err {
            RenderError::ChromeNotFound(why) => assert!(why.contains("/nonexistent/chrome")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn remote_pages_print_from_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("render.pdf");
        let target = RenderTarget::Url("https://recursos.example.org/tema1/".into());
        let dom = "<html><head><title>Tema 1</title></head><body>x</body></html>";

        let url = renderer()
            .print_url(&target, "https://recursos.example.org/tema1/", Some(dom), &output)
            .unwrap();
        let snapshot = dir.path().join(SNAPSHOT_FILE);
        assert_eq!(url, file_url(&snapshot).unwrap());

        let html = std::fs::read_to_string(&snapshot).unwrap();
        assert!(html.contains(r#"<base href="https://recursos.example.org/tema1/">"#));
        assert!(html.contains("@page { size: A4; margin: 12mm 10mm 12mm 10mm; }"));
    }

    #[test]
    fn remote_page_without_dom_prints_live() {
        let dir = tempfile::tempdir().unwrap();
        let target = RenderTarget::Url("https://recursos.example.org/tema1".into());
        let url = renderer()
            .print_url(&target, "https://recursos.example.org/tema1", None, &dir.path().join("render.pdf"))
            .unwrap();
        assert_eq!(url, "https://recursos.example.org/tema1");
        assert!(!dir.path().join(SNAPSHOT_FILE).exists());
    }

    #[test]
    fn last_lines_keeps_tail() {
        assert_eq!(last_lines("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(last_lines("", 3), "");
    }
}
