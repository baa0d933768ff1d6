//! Fakes for the fetch and render collaborators. They count calls so tests
//! can prove cached positions cause no work.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use coursepack_fetch::{FetchError, Fetcher};
use coursepack_render::{
    DiagnosticPaths, RenderError, RenderReport, RenderRequest, RenderTarget, Renderer,
    TypesetStatus,
};
use coursepack_shared::{AppConfig, PipelineContext, Resource, ResourceType, Unit, Manifest};

use crate::document::tests::sample_pdf;

#[derive(Default)]
pub(crate) struct FakeFetcher {
    bodies: HashMap<String, Vec<u8>>,
    pub(crate) calls: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn with(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Prints a PDF whose page width identifies the target, or fails for
/// targets listed in `failing`.
pub(crate) struct FakeRenderer {
    pub(crate) pages: usize,
    pub(crate) typeset: TypesetStatus,
    pub(crate) failing: Vec<String>,
    pub(crate) calls: AtomicUsize,
    pub(crate) diagnostics: AtomicUsize,
    pub(crate) targets: Mutex<Vec<RenderTarget>>,
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self {
            pages: 1,
            typeset: TypesetStatus::NotPresent,
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
            diagnostics: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRenderer {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn targets(&self) -> Vec<RenderTarget> {
        self.targets.lock().unwrap().clone()
    }
}

impl Renderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderReport, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(request.target.clone());

        let label = request.target.to_string();
        if self.failing.iter().any(|f| label.contains(f.as_str())) {
            return Err(RenderError::Timeout { secs: 90 });
        }

        std::fs::write(request.output, sample_pdf(self.pages, 400, Some("Contenido")))
            .map_err(|e| RenderError::io(request.output, e))?;
        Ok(RenderReport {
            typeset: self.typeset,
            text: Some(format!("texto de {label}")),
        })
    }

    async fn capture_diagnostics(
        &self,
        _target: &RenderTarget,
        paths: &DiagnosticPaths,
    ) -> Result<(), RenderError> {
        self.diagnostics.fetch_add(1, Ordering::SeqCst);
        std::fs::write(&paths.content, "<html></html>").map_err(|e| RenderError::io(&paths.content, e))
    }
}

/// Context rooted in `dir`.
pub(crate) fn context(dir: &std::path::Path, subject: &str) -> PipelineContext {
    let mut config = AppConfig::default();
    config.paths.manifest_dir = dir.join("manifests").display().to_string();
    config.paths.temp_root = dir.join("cache").display().to_string();
    config.paths.final_root = dir.join("final").display().to_string();
    config.paths.dumps_root = dir.join("dumps").display().to_string();
    config.paths.reports_root = dir.join("reports").display().to_string();
    PipelineContext::new(&config, subject).unwrap()
}

/// Two units of two resources each.
pub(crate) fn two_unit_manifest(kinds: [ResourceType; 4]) -> Manifest {
    let resource = |i: usize, unit: &str| {
        Resource::new(
            unit,
            format!("{unit}.r{}", i % 2 + 1),
            format!("https://recursos.example.org/{i}"),
            kinds[i],
        )
    };
    Manifest::from_units(
        "fisica",
        vec![
            Unit {
                name: "U1".into(),
                resources: vec![resource(0, "U1"), resource(1, "U1")],
            },
            Unit {
                name: "U2".into(),
                resources: vec![resource(2, "U2"), resource(3, "U2")],
            },
        ],
    )
}
