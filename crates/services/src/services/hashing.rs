//! Deterministic SHA-256 content hashing for artifacts.
//!
//! Single-file artifacts (commands, agents, hooks) hash their raw bytes.
//! Directory artifacts (skills, composites) use a Merkle approach: every
//! included file contributes `(relative_posix_path, sha256)`, the records are
//! sorted by path, and the sorted list feeds one final SHA-256. The result is
//! independent of traversal order and filesystem semantics.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
    "venv",
    ".venv",
    "dist",
    "build",
];

const EXCLUDED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", ".gitkeep"];

const EXCLUDED_PREFIXES: &[&str] = &["~$", ".#"];

const EXCLUDED_SUFFIXES: &[&str] = &[".tmp", ".swp", ".swo", "~"];

#[derive(Debug, Error)]
pub enum HashError {
    #[error("artifact path does not exist: {0}")]
    MissingPath(PathBuf),
    #[error("artifact path is neither a regular file nor a directory: {0}")]
    InvalidTarget(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// True when a bare file or directory name is excluded from hashing.
fn is_excluded(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
        || EXCLUDED_FILES.contains(&name)
        || EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
        || EXCLUDED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn hash_file_content(path: &Path) -> Result<String, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher))
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn relative_posix(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Collect `(relative_posix_path, file_hash)` records for every included file
/// under `root`. Unreadable files are skipped rather than failing the hash.
fn collect_file_entries(root: &Path) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root).follow_links(true).into_iter();
    for entry in walker.filter_entry(|e| {
        e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy())
    }) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("skipping unreadable entry during hash: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match hash_file_content(entry.path()) {
            Ok(hash) => entries.push((relative_posix(root, entry.path()), hash)),
            Err(e) => {
                debug!("skipping unreadable file during hash: {}: {e}", entry.path().display());
            }
        }
    }

    entries
}

/// Combine per-file hashes into the Merkle root. Records are encoded as
/// `<path>\0<hash>\n` and sorted by path first.
fn merkle_hash(mut entries: Vec<(String, String)>) -> String {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (rel_path, file_hash) in &entries {
        hasher.update(rel_path.as_bytes());
        hasher.update(b"\x00");
        hasher.update(file_hash.as_bytes());
        hasher.update(b"\n");
    }
    hex_digest(hasher)
}

/// Compute the content hash of a file or directory artifact.
/// Returns a 64-character lowercase hex string.
pub fn compute_artifact_hash(artifact_path: &Path) -> Result<String, HashError> {
    if !artifact_path.exists() {
        return Err(HashError::MissingPath(artifact_path.to_path_buf()));
    }
    if artifact_path.is_file() {
        return Ok(hash_file_content(artifact_path)?);
    }
    if artifact_path.is_dir() {
        return Ok(merkle_hash(collect_file_entries(artifact_path)));
    }
    Err(HashError::InvalidTarget(artifact_path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_hash_matches_sha256_of_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("COMMAND.md");
        fs::write(&path, b"hello world").unwrap();
        // sha256("hello world")
        assert_eq!(
            compute_artifact_hash(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn directory_hash_is_traversal_order_independent() {
        let make_tree = |order: &[(&str, &str)]| {
            let dir = TempDir::new().unwrap();
            for (name, content) in order {
                let path = dir.path().join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, content).unwrap();
            }
            dir
        };

        let a = make_tree(&[("SKILL.md", "s"), ("ref/a.md", "a"), ("ref/b.md", "b")]);
        let b = make_tree(&[("ref/b.md", "b"), ("SKILL.md", "s"), ("ref/a.md", "a")]);

        assert_eq!(
            compute_artifact_hash(a.path()).unwrap(),
            compute_artifact_hash(b.path()).unwrap()
        );
    }

    #[test]
    fn excluded_entries_do_not_change_the_hash() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("SKILL.md"), "content").unwrap();
        let baseline = compute_artifact_hash(dir.path()).unwrap();

        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: main").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(dir.path().join(".DS_Store"), "junk").unwrap();
        fs::write(dir.path().join("notes.tmp"), "junk").unwrap();
        fs::write(dir.path().join("~$draft.docx"), "junk").unwrap();
        fs::write(dir.path().join("backup~"), "junk").unwrap();

        assert_eq!(compute_artifact_hash(dir.path()).unwrap(), baseline);
    }

    #[test]
    fn adding_an_included_file_changes_the_hash() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("SKILL.md"), "content").unwrap();
        let baseline = compute_artifact_hash(dir.path()).unwrap();

        fs::write(dir.path().join("extra.md"), "more").unwrap();
        assert_ne!(compute_artifact_hash(dir.path()).unwrap(), baseline);
    }

    #[test]
    fn modifying_a_byte_changes_the_hash() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("SKILL.md"), "content").unwrap();
        let baseline = compute_artifact_hash(dir.path()).unwrap();

        fs::write(dir.path().join("SKILL.md"), "Content").unwrap();
        assert_ne!(compute_artifact_hash(dir.path()).unwrap(), baseline);
    }

    #[test]
    fn empty_directory_has_a_stable_hash() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let hash_a = compute_artifact_hash(a.path()).unwrap();
        let hash_b = compute_artifact_hash(b.path()).unwrap();
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = compute_artifact_hash(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, HashError::MissingPath(_)));
    }

    #[test]
    fn hash_is_64_hex_chars() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.md"), "x").unwrap();
        let hash = compute_artifact_hash(&dir.path().join("f.md")).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
