//! Shared types, error model, and configuration for coursepack.
//!
//! This crate is the foundation depended on by all other coursepack crates.
//! It provides:
//! - [`CoursepackError`], the fatal error type
//! - The manifest model ([`Manifest`], [`Unit`], [`Resource`], [`ResourceType`])
//! - Configuration ([`AppConfig`], config loading) and the per-invocation [`PipelineContext`]

pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AssemblyConfig, FetchConfig, MarginsConfig, PathsConfig, PipelineContext,
    RenderConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_subject,
};
pub use error::{CoursepackError, Result};
pub use manifest::{Manifest, ManifestFingerprint, Unit, UnitMap, load_manifest};
pub use types::{Resource, ResourceType};
