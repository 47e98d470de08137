//! Plugin meta-file storage under `<collection_root>/plugins/<slug>/`.
//!
//! Meta files (plugin.json, README.md, …) are staged into a temp sibling
//! directory and rename-replaced so a crash never leaves a half-written
//! plugin directory, and rewriting a plugin removes files absent from the
//! new manifest.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use utils::fs::replace_dir;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PluginStorageError {
    #[error("plugin name '{0}' produces an empty slug")]
    EmptySlug(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Slugify a plugin name for use as a directory name and composite
/// identifier: lowercase, non-alphanumeric runs collapse to a single `-`,
/// leading/trailing `-` stripped. Empty results are rejected.
pub fn slugify_plugin_name(name: &str) -> Result<String, PluginStorageError> {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        return Err(PluginStorageError::EmptySlug(name.to_string()));
    }
    Ok(slug)
}

/// The composite identifier for a plugin name.
pub fn composite_id(name: &str) -> Result<String, PluginStorageError> {
    Ok(format!("composite:{}", slugify_plugin_name(name)?))
}

/// A meta file to be placed at the root of the plugin directory.
#[derive(Debug, Clone)]
pub struct PluginMetaFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Write plugin meta files atomically, replacing any previous directory
/// contents. Returns the final plugin directory path.
pub fn write_plugin_meta_files(
    collection_root: &Path,
    plugin_name: &str,
    meta_files: &[PluginMetaFile],
) -> Result<PathBuf, PluginStorageError> {
    let slug = slugify_plugin_name(plugin_name)?;
    let plugins_root = collection_root.join("plugins");
    fs::create_dir_all(&plugins_root)?;

    let target = plugins_root.join(&slug);
    let staging = plugins_root.join(format!(".{slug}.staging-{}", Uuid::new_v4()));

    let write_all = || -> Result<(), std::io::Error> {
        fs::create_dir_all(&staging)?;
        for meta in meta_files {
            fs::write(staging.join(&meta.filename), &meta.content)?;
        }
        replace_dir(&staging, &target)
    };

    match write_all() {
        Ok(()) => {
            debug!("wrote {} meta file(s) to {}", meta_files.len(), target.display());
            Ok(target)
        }
        Err(e) => {
            if staging.exists() {
                let _ = fs::remove_dir_all(&staging);
            }
            Err(e.into())
        }
    }
}

/// Remove a plugin's meta-file directory (rollback path). Missing
/// directories are fine.
pub fn remove_plugin_dir(collection_root: &Path, plugin_name: &str) -> Result<(), PluginStorageError> {
    let slug = slugify_plugin_name(plugin_name)?;
    let target = collection_root.join("plugins").join(&slug);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    Ok(())
}

/// Collect root-level regular files of a discovered composite as meta files.
/// Children live in subcontainers and are never copied here.
pub fn collect_meta_files(parent_path: &Path) -> Result<Vec<PluginMetaFile>, PluginStorageError> {
    let mut meta_files = Vec::new();
    for entry in fs::read_dir(parent_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        meta_files.push(PluginMetaFile {
            filename: entry.file_name().to_string_lossy().into_owned(),
            content: fs::read(entry.path())?,
        });
    }
    meta_files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(meta_files)
}
