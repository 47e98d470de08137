//! Signature-based artifact discovery.
//!
//! Scans platform container directories (`.claude/skills/`, …) or collection
//! `artifacts/` trees, identifies artifacts by container name plus manifest
//! signature, extracts frontmatter metadata, and classifies composites.
//! Individual artifact failures are collected into the scan result and never
//! abort the scan.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use db::models::artifact::ArtifactType;
use db::models::composite::CompositeType;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info, warn};
use utils::frontmatter::read_frontmatter;

/// Static per-type detection rules: which containers hold the type, whether
/// an artifact is a file or a directory, which manifest files identify it,
/// and whether artifacts may nest.
#[derive(Debug)]
pub struct ArtifactSignature {
    pub artifact_type: ArtifactType,
    pub canonical_container: &'static str,
    pub container_aliases: &'static [&'static str],
    pub directory_based: bool,
    pub manifest_files: &'static [&'static str],
    pub allowed_nesting: bool,
}

pub static ARTIFACT_SIGNATURES: &[ArtifactSignature] = &[
    ArtifactSignature {
        artifact_type: ArtifactType::Skill,
        canonical_container: "skills",
        container_aliases: &["skills", "SKILLS"],
        directory_based: true,
        manifest_files: &["SKILL.md"],
        allowed_nesting: true,
    },
    ArtifactSignature {
        artifact_type: ArtifactType::Command,
        canonical_container: "commands",
        container_aliases: &["commands"],
        directory_based: false,
        manifest_files: &["COMMAND.md", "command.md"],
        allowed_nesting: false,
    },
    ArtifactSignature {
        artifact_type: ArtifactType::Agent,
        canonical_container: "agents",
        container_aliases: &["agents", "subagents"],
        directory_based: false,
        manifest_files: &["AGENT.md", "agent.md"],
        allowed_nesting: false,
    },
    ArtifactSignature {
        artifact_type: ArtifactType::Hook,
        canonical_container: "hooks",
        container_aliases: &["hooks"],
        directory_based: true,
        manifest_files: &["HOOK.md", "hook.md"],
        allowed_nesting: false,
    },
    ArtifactSignature {
        artifact_type: ArtifactType::Mcp,
        canonical_container: "mcp",
        container_aliases: &["mcp", "mcps"],
        directory_based: true,
        manifest_files: &["MCP.md", "mcp.json"],
        allowed_nesting: false,
    },
];

pub fn signature_for(artifact_type: ArtifactType) -> Option<&'static ArtifactSignature> {
    ARTIFACT_SIGNATURES
        .iter()
        .find(|s| s.artifact_type == artifact_type)
}

/// Normalize a container directory name via the alias registry.
pub fn signature_for_container(name: &str) -> Option<&'static ArtifactSignature> {
    ARTIFACT_SIGNATURES.iter().find(|s| {
        s.container_aliases
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(name))
    })
}

/// How thoroughly detection matched the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Manifest present and every signature constraint satisfied.
    Strict,
    /// Partial signals only (e.g. filename hints); used by bulk discovery.
    Heuristic,
}

const STRICT_CONFIDENCE: u8 = 100;
const HEURISTIC_CONFIDENCE: u8 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Project,
    Collection,
    Auto,
}

/// Metadata about a discovered artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredArtifact {
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub name: String,
    pub source: Option<String>,
    pub version: Option<String>,
    pub scope: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub path: PathBuf,
    pub confidence: u8,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredArtifact {
    /// Collision-resistant key, `"<type>:<name>"`.
    pub fn artifact_key(&self) -> String {
        self.artifact_type.artifact_id(&self.name)
    }
}

#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub discovered_count: usize,
    pub artifacts: Vec<DiscoveredArtifact>,
    pub errors: Vec<String>,
    pub scan_duration_ms: f64,
}

/// Maximum recursion depth for nesting-enabled types.
const MAX_NESTING_DEPTH: usize = 3;

pub struct ArtifactDiscoveryService {
    base_path: PathBuf,
    scan_mode: ScanMode,
    artifacts_base: PathBuf,
}

impl ArtifactDiscoveryService {
    /// `Auto` prefers project mode (`.claude/`) when both layouts exist:
    /// a project checkout may vendor a collection subtree, never the reverse.
    pub fn new(base_path: &Path, scan_mode: ScanMode) -> Self {
        let (scan_mode, artifacts_base) = match scan_mode {
            ScanMode::Project => (ScanMode::Project, base_path.join(".claude")),
            ScanMode::Collection => (ScanMode::Collection, base_path.join("artifacts")),
            ScanMode::Auto => {
                if base_path.join(".claude").exists() {
                    (ScanMode::Project, base_path.join(".claude"))
                } else if base_path.join("artifacts").exists() {
                    (ScanMode::Collection, base_path.join("artifacts"))
                } else {
                    (ScanMode::Project, base_path.join(".claude"))
                }
            }
        };
        Self {
            base_path: base_path.to_path_buf(),
            scan_mode,
            artifacts_base,
        }
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    /// Scan every known container under the artifacts base.
    pub fn discover_artifacts(&self) -> DiscoveryResult {
        let start = Instant::now();
        let mut artifacts = Vec::new();
        let mut errors = Vec::new();

        if !self.artifacts_base.exists() {
            let message = format!(
                "artifacts directory not found: {} (scan_mode={:?})",
                self.artifacts_base.display(),
                self.scan_mode
            );
            warn!("{message}");
            errors.push(message);
            return DiscoveryResult {
                discovered_count: 0,
                artifacts,
                errors,
                scan_duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
        }

        match fs::read_dir(&self.artifacts_base) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_dir() {
                        continue;
                    }
                    let container_name = entry.file_name().to_string_lossy().into_owned();
                    let Some(signature) = signature_for_container(&container_name) else {
                        debug!("skipping unknown container: {container_name}");
                        continue;
                    };
                    self.scan_container(&path, signature, &mut artifacts, &mut errors);
                }
            }
            Err(e) => {
                let message = format!(
                    "error reading artifacts directory {}: {e}",
                    self.artifacts_base.display()
                );
                warn!("{message}");
                errors.push(message);
            }
        }

        let scan_duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            artifact_count = artifacts.len(),
            error_count = errors.len(),
            duration_ms = scan_duration_ms,
            base = %self.base_path.display(),
            "discovery scan completed"
        );

        DiscoveryResult {
            discovered_count: artifacts.len(),
            artifacts,
            errors,
            scan_duration_ms,
        }
    }

    fn scan_container(
        &self,
        container: &Path,
        signature: &'static ArtifactSignature,
        out: &mut Vec<DiscoveredArtifact>,
        errors: &mut Vec<String>,
    ) {
        let entries = match fs::read_dir(container) {
            Ok(entries) => entries,
            Err(e) => {
                errors.push(format!("error scanning {}: {e}", container.display()));
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();

            if path.is_dir() {
                if manifest_in(&path, signature).is_some() {
                    self.emit(&path, signature, DetectionMode::Strict, out, errors);
                } else if signature.allowed_nesting {
                    self.scan_nested(&path, signature, 1, out, errors);
                } else {
                    debug!("no manifest in {}", path.display());
                }
            } else if !signature.directory_based
                && path.extension().is_some_and(|ext| ext == "md")
            {
                self.emit(&path, signature, DetectionMode::Strict, out, errors);
            }
        }
    }

    fn scan_nested(
        &self,
        dir: &Path,
        signature: &'static ArtifactSignature,
        depth: usize,
        out: &mut Vec<DiscoveredArtifact>,
        errors: &mut Vec<String>,
    ) {
        // Entries inside `dir` sit at depth + 1 below the container.
        if depth >= MAX_NESTING_DEPTH {
            debug!("nesting depth limit reached at {}", dir.display());
            return;
        }
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if manifest_in(&path, signature).is_some() {
                self.emit(&path, signature, DetectionMode::Strict, out, errors);
            } else {
                self.scan_nested(&path, signature, depth + 1, out, errors);
            }
        }
    }

    fn emit(
        &self,
        path: &Path,
        signature: &'static ArtifactSignature,
        mode: DetectionMode,
        out: &mut Vec<DiscoveredArtifact>,
        errors: &mut Vec<String>,
    ) {
        match build_discovered(path, signature.artifact_type, mode) {
            Ok(artifact) => {
                debug!("discovered {}: {}", signature.artifact_type, artifact.name);
                out.push(artifact);
            }
            Err(e) => {
                let message = format!("error processing {}: {e}", path.display());
                warn!("{message}");
                errors.push(message);
            }
        }
    }
}

fn manifest_in(dir: &Path, signature: &ArtifactSignature) -> Option<PathBuf> {
    signature
        .manifest_files
        .iter()
        .map(|m| dir.join(m))
        .find(|p| p.exists())
}

/// Detect the type of an arbitrary path by signature, independent of its
/// container. Directories match when a manifest is present (strict); bare
/// `.md` files fall back to filename hints (heuristic).
pub fn detect_artifact_type(path: &Path) -> Option<(ArtifactType, DetectionMode)> {
    if path.is_dir() {
        for signature in ARTIFACT_SIGNATURES {
            if manifest_in(path, signature).is_some() {
                return Some((signature.artifact_type, DetectionMode::Strict));
            }
        }
        return None;
    }

    if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem.contains("command") {
            return Some((ArtifactType::Command, DetectionMode::Heuristic));
        }
        if stem.contains("agent") {
            return Some((ArtifactType::Agent, DetectionMode::Heuristic));
        }
    }
    None
}

/// Frontmatter keys recognized on artifact manifests, with aliases folded
/// (`title` -> `name`, `upstream` -> `source`).
#[derive(Debug, Default, Clone)]
pub struct ArtifactMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub version: Option<String>,
    pub scope: Option<String>,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub license: Option<String>,
}

/// Extract normalized metadata from an artifact's manifest frontmatter.
/// Missing or malformed frontmatter yields empty metadata rather than an
/// error.
pub fn extract_artifact_metadata(manifest_path: &Path) -> ArtifactMetadata {
    let mapping = match read_frontmatter(manifest_path) {
        Ok(Some(mapping)) => mapping,
        Ok(None) => return ArtifactMetadata::default(),
        Err(e) => {
            warn!(
                "failed to extract frontmatter from {}: {e}",
                manifest_path.display()
            );
            return ArtifactMetadata::default();
        }
    };

    let get_str = |key: &str| -> Option<String> {
        mapping
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let tags = match mapping.get("tags") {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    ArtifactMetadata {
        name: get_str("name").or_else(|| get_str("title")),
        description: get_str("description"),
        source: get_str("source").or_else(|| get_str("upstream")),
        version: get_str("version"),
        scope: get_str("scope"),
        tags,
        author: get_str("author"),
        license: get_str("license"),
    }
}

fn build_discovered(
    path: &Path,
    artifact_type: ArtifactType,
    mode: DetectionMode,
) -> Result<DiscoveredArtifact, std::io::Error> {
    let signature = signature_for(artifact_type);
    let manifest_path = if path.is_dir() {
        signature.and_then(|s| manifest_in(path, s))
    } else {
        Some(path.to_path_buf())
    };

    let metadata = manifest_path
        .as_deref()
        // mcp.json carries no frontmatter; only markdown manifests do.
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .map(extract_artifact_metadata)
        .unwrap_or_default();

    let fallback_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());

    Ok(DiscoveredArtifact {
        artifact_type,
        name: metadata.name.unwrap_or(fallback_name),
        source: metadata.source,
        version: metadata.version,
        scope: metadata.scope,
        tags: metadata.tags,
        description: metadata.description,
        path: path.to_path_buf(),
        confidence: match mode {
            DetectionMode::Strict => STRICT_CONFIDENCE,
            DetectionMode::Heuristic => HEURISTIC_CONFIDENCE,
        },
        discovered_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Pre-scan existence filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PrescanOutcome {
    /// Candidates absent from the collection, the project, or both.
    pub importable: Vec<DiscoveredArtifact>,
    /// Candidates present in both; excluded from import.
    pub already_present: Vec<DiscoveredArtifact>,
}

/// Filter discovered candidates against collection and project state.
/// A candidate found in *both* is excluded from import; anywhere else it
/// remains importable.
pub fn prescan_filter(
    candidates: Vec<DiscoveredArtifact>,
    in_collection: &HashSet<String>,
    in_project: &HashSet<String>,
) -> PrescanOutcome {
    let mut outcome = PrescanOutcome::default();
    for candidate in candidates {
        let key = candidate.artifact_key();
        if in_collection.contains(&key) && in_project.contains(&key) {
            outcome.already_present.push(candidate);
        } else {
            outcome.importable.push(candidate);
        }
    }
    outcome
}

/// Artifact keys currently deployed in a project, from a project-mode scan.
pub fn project_artifact_keys(project_path: &Path) -> HashSet<String> {
    ArtifactDiscoveryService::new(project_path, ScanMode::Project)
        .discover_artifacts()
        .artifacts
        .iter()
        .map(DiscoveredArtifact::artifact_key)
        .collect()
}

// ---------------------------------------------------------------------------
// Composite detection
// ---------------------------------------------------------------------------

/// A composite candidate: a parent bundle plus its flat discovered children.
#[derive(Debug, Clone)]
pub struct DiscoveredGraph {
    pub parent_name: String,
    pub parent_path: PathBuf,
    pub composite_type: CompositeType,
    pub source_url: Option<String>,
    pub children: Vec<DiscoveredArtifact>,
}

/// Classify a container as a composite.
///
/// A container is a composite when a `plugin.json` sits at its root, or when
/// at least two valid single-type subcontainers are present simultaneously.
pub fn detect_composite(container: &Path) -> Option<DiscoveredGraph> {
    if !container.is_dir() {
        return None;
    }

    let plugin_manifest = container.join("plugin.json");
    let has_plugin_manifest = plugin_manifest.exists();

    let mut children = Vec::new();
    let mut populated_containers = 0usize;

    if let Ok(entries) = fs::read_dir(container) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(signature) = signature_for_container(&name) else {
                continue;
            };
            let mut found = Vec::new();
            let mut errors = Vec::new();
            let service = ArtifactDiscoveryService::new(container, ScanMode::Project);
            service.scan_container(&path, signature, &mut found, &mut errors);
            if !found.is_empty() {
                populated_containers += 1;
                children.extend(found);
            }
        }
    }

    if !has_plugin_manifest && populated_containers < 2 {
        return None;
    }

    let (parent_name, source_url) = if has_plugin_manifest {
        parse_plugin_manifest(&plugin_manifest)
    } else {
        (None, None)
    };
    let parent_name = parent_name.unwrap_or_else(|| {
        container
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string())
    });

    // A skill with embedded members carries its own SKILL.md at the root;
    // everything else imports as a plugin bundle.
    let composite_type = if !has_plugin_manifest && container.join("SKILL.md").exists() {
        CompositeType::Skill
    } else {
        CompositeType::Plugin
    };

    Some(DiscoveredGraph {
        parent_name,
        parent_path: container.to_path_buf(),
        composite_type,
        source_url,
        children,
    })
}

fn parse_plugin_manifest(path: &Path) -> (Option<String>, Option<String>) {
    let Ok(raw) = fs::read_to_string(path) else {
        return (None, None);
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        debug!("malformed plugin.json at {}", path.display());
        return (None, None);
    };
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let source = value
        .get("source")
        .or_else(|| value.get("repository"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    (name, source)
}
