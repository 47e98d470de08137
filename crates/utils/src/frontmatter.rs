//! YAML frontmatter reading and in-place editing for artifact manifests.
//!
//! Edits touch only the requested field and keep every other frontmatter key,
//! the markdown body, and any BOM intact. Writes go through
//! [`crate::fs::atomic_write`].

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fs::{atomic_write, AtomicWriteError};

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Write(#[from] AtomicWriteError),
}

fn frontmatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^(\x{FEFF}?)---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(\r?\n|$)")
            .expect("frontmatter regex is valid")
    })
}

/// Split a document into `(bom, yaml_text, body)` if it starts with a
/// `---` delimited frontmatter block.
fn split_document(content: &str) -> Option<(&str, &str, &str)> {
    let caps = frontmatter_re().captures(content)?;
    let whole = caps.get(0)?;
    let bom = caps.get(1).map_or("", |m| m.as_str());
    let yaml = caps.get(2).map_or("", |m| m.as_str());
    Some((bom, yaml, &content[whole.end()..]))
}

/// Parse the frontmatter mapping of a markdown document, if present and valid.
pub fn parse_frontmatter(content: &str) -> Option<Mapping> {
    let (_, yaml, _) = split_document(content)?;
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(map)) => Some(map),
        Ok(Value::Null) => Some(Mapping::new()),
        Ok(_) => None,
        Err(e) => {
            debug!("frontmatter parse failed: {e}");
            None
        }
    }
}

/// Read and parse the frontmatter of a file. Returns `Ok(None)` when the file
/// has no frontmatter block or the YAML is malformed.
pub fn read_frontmatter(path: &Path) -> Result<Option<Mapping>, FrontmatterError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_frontmatter(&content))
}

fn rewrite(path: &Path, bom: &str, map: &Mapping, body: &str) -> Result<(), FrontmatterError> {
    let yaml = serde_yaml::to_string(map).unwrap_or_default();
    let yaml = yaml.trim_end_matches('\n');
    let new_content = format!("{bom}---\n{yaml}\n---\n{body}");
    atomic_write(path, &new_content)?;
    Ok(())
}

/// Update a single frontmatter field, preserving all other fields and the
/// markdown body. Returns `Ok(false)` when the file has no frontmatter, the
/// YAML is malformed, or the field already holds `new_value`.
pub fn update_frontmatter_field(
    path: &Path,
    field_name: &str,
    new_value: Value,
) -> Result<bool, FrontmatterError> {
    if !path.exists() {
        warn!("file not found: {}", path.display());
        return Ok(false);
    }

    let content = std::fs::read_to_string(path)?;
    let Some((bom, yaml, body)) = split_document(&content) else {
        debug!("no frontmatter found in {}", path.display());
        return Ok(false);
    };

    let mut map = match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(map)) => map,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) | Err(_) => {
            warn!("failed to parse frontmatter in {}", path.display());
            return Ok(false);
        }
    };

    if map.get(field_name) == Some(&new_value) {
        return Ok(false);
    }
    map.insert(Value::String(field_name.to_string()), new_value);

    rewrite(path, bom, &map, body)?;
    Ok(true)
}

fn current_tags(map: &Mapping) -> Option<Vec<String>> {
    match map.get("tags") {
        Some(Value::Sequence(seq)) => Some(
            seq.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

/// Replace `old_name` with `new_name` in a file's frontmatter `tags:` list,
/// preserving order and avoiding duplicates. Returns `Ok(false)` when
/// `old_name` is not present.
pub fn rename_tag_in_frontmatter(
    path: &Path,
    old_name: &str,
    new_name: &str,
) -> Result<bool, FrontmatterError> {
    edit_tags(path, |tags| {
        if !tags.iter().any(|t| t == old_name) {
            return None;
        }
        let mut new_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let replacement = if tag == old_name { new_name } else { tag.as_str() };
            if replacement.is_empty() {
                continue;
            }
            if !new_tags.iter().any(|t| t == replacement) {
                new_tags.push(replacement.to_string());
            }
        }
        Some(new_tags)
    })
}

/// Remove `tag_name` from a file's frontmatter `tags:` list. Returns
/// `Ok(false)` when the tag is not present.
pub fn remove_tag_from_frontmatter(path: &Path, tag_name: &str) -> Result<bool, FrontmatterError> {
    edit_tags(path, |tags| {
        if !tags.iter().any(|t| t == tag_name) {
            return None;
        }
        Some(tags.iter().filter(|t| *t != tag_name).cloned().collect())
    })
}

fn edit_tags<F>(path: &Path, edit: F) -> Result<bool, FrontmatterError>
where
    F: FnOnce(&[String]) -> Option<Vec<String>>,
{
    if !path.exists() {
        warn!("file not found: {}", path.display());
        return Ok(false);
    }

    let content = std::fs::read_to_string(path)?;
    let Some((bom, yaml, body)) = split_document(&content) else {
        return Ok(false);
    };

    let mut map = match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(map)) => map,
        _ => return Ok(false),
    };

    let Some(tags) = current_tags(&map) else {
        return Ok(false);
    };
    let Some(new_tags) = edit(&tags) else {
        return Ok(false);
    };

    map.insert(
        Value::String("tags".to_string()),
        Value::Sequence(new_tags.into_iter().map(Value::String).collect()),
    );

    rewrite(path, bom, &map, body)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_doc(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const DOC: &str = "---\nname: canvas\ntags:\n- design\n- Beta\ndescription: a skill\n---\n# Body\n\ncontent here\n";

    #[test]
    fn parse_returns_mapping_and_preserves_unknown_keys() {
        let map = parse_frontmatter(DOC).unwrap();
        assert_eq!(map.get("name"), Some(&Value::String("canvas".into())));
        assert_eq!(
            map.get("description"),
            Some(&Value::String("a skill".into()))
        );
    }

    #[test]
    fn parse_returns_none_without_frontmatter() {
        assert!(parse_frontmatter("# Just markdown\n").is_none());
    }

    #[test]
    fn rename_tag_preserves_order_and_body() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "SKILL.md", DOC);

        assert!(rename_tag_in_frontmatter(&path, "Beta", "Preview").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        let map = parse_frontmatter(&content).unwrap();
        let tags = current_tags(&map).unwrap();
        assert_eq!(tags, vec!["design".to_string(), "Preview".to_string()]);
        assert!(content.ends_with("# Body\n\ncontent here\n"));
    }

    #[test]
    fn rename_tag_deduplicates_when_target_already_present() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(
            &dir,
            "SKILL.md",
            "---\ntags:\n- Preview\n- Beta\n---\nbody\n",
        );

        assert!(rename_tag_in_frontmatter(&path, "Beta", "Preview").unwrap());
        let map = read_frontmatter(&path).unwrap().unwrap();
        assert_eq!(current_tags(&map).unwrap(), vec!["Preview".to_string()]);
    }

    #[test]
    fn rename_tag_returns_false_when_absent() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "SKILL.md", DOC);
        assert!(!rename_tag_in_frontmatter(&path, "nope", "x").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DOC);
    }

    #[test]
    fn remove_tag_strips_only_that_tag() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "SKILL.md", DOC);
        assert!(remove_tag_from_frontmatter(&path, "Beta").unwrap());
        let map = read_frontmatter(&path).unwrap().unwrap();
        assert_eq!(current_tags(&map).unwrap(), vec!["design".to_string()]);
    }

    #[test]
    fn update_field_is_noop_for_equal_value() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "SKILL.md", DOC);
        let changed =
            update_frontmatter_field(&path, "name", Value::String("canvas".into())).unwrap();
        assert!(!changed);
    }

    #[test]
    fn update_field_rewrites_value() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "SKILL.md", DOC);
        let changed =
            update_frontmatter_field(&path, "version", Value::String("1.2.0".into())).unwrap();
        assert!(changed);
        let map = read_frontmatter(&path).unwrap().unwrap();
        assert_eq!(map.get("version"), Some(&Value::String("1.2.0".into())));
    }

    #[test]
    fn bom_is_preserved() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "SKILL.md", "\u{FEFF}---\ntags:\n- a\n---\nbody\n");
        assert!(rename_tag_in_frontmatter(&path, "a", "b").unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('\u{FEFF}'));
    }
}
