//! Artifact naming, validation, and version-override resolution.
//!
//! Symbolic artifact names follow an `org/project/name:version` scheme where
//! every segment except `name` is optional. Resolution is purely local: it
//! fills defaults and applies caller-supplied version pins, but never talks
//! to the network and therefore cannot expand the "latest" sentinel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{NameError, VersionedObjectRef};

/// Version sentinel meaning "most recent version known to the run recorder".
pub const LATEST_VERSION: &str = "latest";

/// Check a name segment against the allowed character set.
///
/// Segments must be non-empty combinations of alphanumerics, underscores,
/// dashes, and dots. `None` is valid here since most segments are optional.
pub fn validate_name_segment(value: Option<&str>, role: &str) -> Result<(), NameError> {
    let Some(value) = value else {
        return Ok(());
    };

    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(NameError::InvalidField {
            role: role.to_string(),
            value: value.to_string(),
        })
    }
}

/// A parsed symbolic artifact identifier.
///
/// Any optional field may be `None` when the source string omitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactName {
    /// Owning organization.
    pub org: Option<String>,
    /// Owning project.
    pub project: Option<String>,
    /// Artifact name, always required.
    pub name: String,
    /// Version token or tag (e.g. "v3", "latest").
    pub version: Option<String>,
}

impl ArtifactName {
    /// Construct and validate an artifact name from parts.
    pub fn new(
        org: Option<String>,
        project: Option<String>,
        name: impl Into<String>,
        version: Option<String>,
    ) -> Result<Self, NameError> {
        let name = name.into();
        validate_name_segment(org.as_deref(), "org")?;
        validate_name_segment(project.as_deref(), "project")?;
        validate_name_segment(Some(&name), "artifact")?;
        validate_name_segment(version.as_deref(), "version")?;
        Ok(Self {
            org,
            project,
            name,
            version,
        })
    }

    /// Parse a symbolic artifact name.
    ///
    /// Supported forms: `name`, `project/name`, `org/project/name`, each with
    /// an optional `:version` suffix. Anything else is a parse error.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let mut pieces: Vec<&str> = raw.split('/').collect();
        let mut version = None;

        // If there's a version, pull it off the last piece.
        if let Some(last) = pieces.last_mut() {
            if let Some((head, tail)) = last.rsplit_once(':') {
                version = Some(tail.to_string());
                *last = head;
            }
        }

        let (org, project, name) = match pieces.as_slice() {
            [name] => (None, None, *name),
            [project, name] => (None, Some(*project), *name),
            [org, project, name] => (Some(*org), Some(*project), *name),
            _ => return Err(NameError::Parse(raw.to_string())),
        };

        Self::new(
            org.map(str::to_string),
            project.map(str::to_string),
            name,
            version,
        )
    }

    /// Test whether this and another artifact name are compatible.
    ///
    /// Names match when every field set on *both* sides agrees, ignoring
    /// versions. An unset field acts as a wildcard; `name` always has to
    /// match exactly. This is weaker than equality and is the rule used to
    /// locate override entries.
    pub fn matches(&self, other: &ArtifactName) -> bool {
        if let (Some(a), Some(b)) = (&self.org, &other.org) {
            if a != b {
                return false;
            }
        }
        if let (Some(a), Some(b)) = (&self.project, &other.project) {
            if a != b {
                return false;
            }
        }
        self.name == other.name
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pieces: Vec<&str> = Vec::new();
        if let Some(org) = &self.org {
            pieces.push(org);
        }
        if let Some(project) = &self.project {
            pieces.push(project);
        }
        pieces.push(&self.name);
        write!(f, "{}", pieces.join("/"))?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

/// Ordered list of artifact version pins.
///
/// Sourced from configuration once at process start; applied at resolution
/// time with first-match-wins semantics.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: Vec<ArtifactName>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `NAME:VERSION` pin strings into a table, preserving order.
    pub fn parse(pins: &[String]) -> Result<Self, NameError> {
        let mut entries = Vec::with_capacity(pins.len());
        for pin in pins {
            entries.push(ArtifactName::parse(pin.trim())?);
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the version pinned for `name`, if any. First match wins.
    pub fn version_for(&self, name: &ArtifactName) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| name.matches(entry))
            .and_then(|entry| entry.version.as_deref())
    }

    /// Resolve a symbolic artifact name.
    ///
    /// Fills the project from `default_project` when unset, defaults the
    /// version to "latest", then applies the first matching override pin.
    /// Works without network access, so "latest" stays symbolic here.
    pub fn resolve(&self, raw: &str, default_project: Option<&str>) -> Result<String, NameError> {
        let mut parsed = ArtifactName::parse(raw)?;
        if parsed.project.is_none() {
            parsed.project = default_project.map(str::to_string);
        }
        if parsed.version.is_none() {
            parsed.version = Some(LATEST_VERSION.to_string());
        }
        if let Some(version) = self.version_for(&parsed) {
            parsed.version = Some(version.to_string());
        }
        Ok(parsed.to_string())
    }
}

/// A named, typed bundle of versioned object references.
///
/// Produced by exactly one action and consumed by any number of others; the
/// first object is the "primary" one for display purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name (same character constraints as [`ArtifactName`] segments).
    pub name: String,
    /// Free-text type tag; project conventions decide its semantics.
    pub artifact_type: String,
    /// Object references making up the artifact contents. Never empty.
    pub objects: Vec<VersionedObjectRef>,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        objects: Vec<VersionedObjectRef>,
    ) -> Result<Self, NameError> {
        let name = name.into();
        let artifact_type = artifact_type.into();
        validate_name_segment(Some(&name), "artifact")?;
        validate_name_segment(Some(&artifact_type), "artifact type")?;
        if objects.is_empty() {
            return Err(NameError::EmptyArtifact(name));
        }
        Ok(Self {
            name,
            artifact_type,
            objects,
        })
    }

    /// The primary object reference (always present).
    pub fn primary(&self) -> &VersionedObjectRef {
        &self.objects[0]
    }

    /// Human-readable description based on the primary object.
    pub fn description(&self) -> String {
        let primary = self.primary();
        let mut description = format!("{}/{}", primary.store_id, primary.key);
        if self.objects.len() > 1 {
            description = format!("{} (+{} others)", description, self.objects.len() - 1);
        }
        description
    }

    /// Debugging metadata recorded alongside the artifact.
    pub fn recorder_metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let primary = self.primary();
        BTreeMap::from([
            ("primary_key".to_string(), primary.key.clone().into()),
            ("primary_store_id".to_string(), primary.store_id.clone().into()),
            ("primary_version".to_string(), primary.version.clone().into()),
            ("primary_uri".to_string(), primary.to_uri().into()),
            ("num_files".to_string(), self.objects.len().into()),
        ])
    }
}
