//! The subject manifest: units, resources, and the canonical processing order.
//!
//! `resources_by_unit` is an *ordered* mapping. A plain JSON map would come
//! back sorted by key, so [`UnitMap`] deserializes entries in document order.
//! Positions in `resource_list_ordered` address the cache, so the flattened
//! list must agree with the grouping; [`Manifest::validate`] enforces that and
//! [`ManifestFingerprint`] detects a manifest regenerated between stages.

use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CoursepackError, Result};
use crate::types::Resource;

// ---------------------------------------------------------------------------
// Unit / UnitMap
// ---------------------------------------------------------------------------

/// A named unit and its resources, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    pub resources: Vec<Resource>,
}

/// Ordered `unit name → resources` mapping that preserves document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitMap(Vec<Unit>);

impl UnitMap {
    pub fn new(units: Vec<Unit>) -> Self {
        Self(units)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Unit> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for UnitMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for unit in &self.0 {
            map.serialize_entry(&unit.name, &unit.resources)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UnitMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct UnitMapVisitor;

        impl<'de> Visitor<'de> for UnitMapVisitor {
            type Value = UnitMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of unit names to resource lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<UnitMap, A::Error> {
                let mut units: Vec<Unit> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, resources)) = access.next_entry::<String, Vec<Resource>>()? {
                    if units.iter().any(|u| u.name == name) {
                        return Err(serde::de::Error::custom(format!("duplicate unit '{name}'")));
                    }
                    units.push(Unit { name, resources });
                }
                Ok(UnitMap(units))
            }
        }

        deserializer.deserialize_map(UnitMapVisitor)
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The `manifest_<subject>.json` document produced by the discovery stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Subject identifier.
    pub subject: String,
    /// Page the crawler started from (provenance only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_url: Option<String>,
    /// Ordered unit grouping.
    pub resources_by_unit: UnitMap,
    /// Flattened canonical processing order.
    pub resource_list_ordered: Vec<Resource>,
}

impl Manifest {
    /// Build a manifest from ordered units, deriving the flattened list.
    pub fn from_units(subject: impl Into<String>, units: Vec<Unit>) -> Self {
        let resource_list_ordered = units
            .iter()
            .flat_map(|u| u.resources.iter().cloned())
            .collect();
        Self {
            subject: subject.into(),
            seed_url: None,
            resources_by_unit: UnitMap::new(units),
            resource_list_ordered,
        }
    }

    /// Units in manifest order.
    pub fn units(&self) -> std::slice::Iter<'_, Unit> {
        self.resources_by_unit.iter()
    }

    /// Resources in canonical order.
    pub fn resources(&self) -> &[Resource] {
        &self.resource_list_ordered
    }

    pub fn unit_count(&self) -> usize {
        self.resources_by_unit.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resource_list_ordered.len()
    }

    /// Each unit paired with the canonical position of its first resource.
    pub fn unit_spans(&self) -> Vec<(&Unit, usize)> {
        let mut start = 0;
        self.units()
            .map(|unit| {
                let span = (unit, start);
                start += unit.resources.len();
                span
            })
            .collect()
    }

    /// Check that the flattened list mirrors the unit grouping position by position.
    pub fn validate(&self) -> Result<()> {
        let grouped: usize = self.units().map(|u| u.resources.len()).sum();
        if grouped != self.resource_list_ordered.len() {
            return Err(CoursepackError::validation(format!(
                "resource_list_ordered has {} entries but resources_by_unit groups {grouped}",
                self.resource_list_ordered.len()
            )));
        }

        for (unit, start) in self.unit_spans() {
            for (offset, grouped) in unit.resources.iter().enumerate() {
                let position = start + offset;
                let flat = &self.resource_list_ordered[position];
                if flat.url != grouped.url {
                    return Err(CoursepackError::validation(format!(
                        "position {position}: resource_list_ordered has '{}' but unit '{}' lists '{}'",
                        flat.url, unit.name, grouped.url
                    )));
                }
                if grouped.unit != unit.name || flat.unit != unit.name {
                    return Err(CoursepackError::validation(format!(
                        "position {position}: resource '{}' declares unit '{}' but is grouped under '{}'",
                        grouped.text, grouped.unit, unit.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Digest of the canonical order.
    pub fn fingerprint(&self) -> ManifestFingerprint {
        let mut hasher = Sha256::new();
        for (position, resource) in self.resource_list_ordered.iter().enumerate() {
            hasher.update(format!("{position}\u{1f}{}\u{1f}{}\n", resource.unit, resource.url));
        }
        ManifestFingerprint(format!("{:x}", hasher.finalize()))
    }
}

/// Load and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        return Err(CoursepackError::setup(format!(
            "manifest not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| CoursepackError::io(path, e))?;
    let manifest: Manifest = serde_json::from_str(&content).map_err(|e| {
        CoursepackError::validation(format!("invalid manifest {}: {e}", path.display()))
    })?;
    manifest.validate()?;

    debug!(
        subject = %manifest.subject,
        units = manifest.unit_count(),
        resources = manifest.resource_count(),
        "manifest loaded"
    );

    Ok(manifest)
}

// ---------------------------------------------------------------------------
// ManifestFingerprint
// ---------------------------------------------------------------------------

/// SHA-256 over the ordered `(position, unit, url)` triples of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestFingerprint(pub String);

impl fmt::Display for ManifestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
