//! End-to-end flow: discover a plugin tree, import it transactionally,
//! resolve a deployment set over the imported artifacts, and materialize
//! them into a project.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use db::models::artifact::Artifact;
use db::models::artifact_version::ArtifactVersion;
use db::models::deployment_profile::{CreateDeploymentProfile, DeploymentProfile, Platform};
use db::models::deployment_set::{CreateDeploymentSet, DeploymentSet, DeploymentSetMember};
use db::models::project::{CreateProject, Project};
use db::DBService;
use services::services::collection::{ArtifactEntry, CollectionStore};
use services::services::config::WorkspaceConfig;
use services::services::deployer::{DeployOptions, DeploymentEngine};
use services::services::discovery::detect_composite;
use services::services::importer::PluginImporter;
use services::services::tracker;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Register imported artifacts in the collection manifest so the deployer
/// can locate their content. The importer pins registry rows; manifest
/// entries come from the surrounding collection workflow.
fn register_in_manifest(store: &CollectionStore, entries: &[(&str, &str, &str)]) {
    let mut manifest = store.read_manifest("default").unwrap();
    for (artifact_type, name, rel) in entries {
        manifest.artifacts.push(ArtifactEntry {
            artifact_type: artifact_type.to_string(),
            name: name.to_string(),
            path: rel.to_string(),
            origin: None,
            added: None,
            tags: vec![],
            metadata: None,
        });
    }
    store.write_manifest("default", &manifest).unwrap();
}

#[tokio::test]
async fn plugin_import_then_set_deploy() {
    let home = TempDir::new().unwrap();
    let upstream = TempDir::new().unwrap();
    let project_dir = TempDir::new().unwrap();

    // A plugin tree as the fetch layer would leave it on disk.
    write(
        upstream.path(),
        "bundle/plugin.json",
        r#"{"name": "git-workflow"}"#,
    );
    write(
        upstream.path(),
        "bundle/skills/alpha/SKILL.md",
        "---\nname: alpha\n---\nalpha body\n",
    );
    write(
        upstream.path(),
        "bundle/commands/beta.md",
        "---\nname: beta\n---\nbeta body\n",
    );

    let graph = detect_composite(&upstream.path().join("bundle")).expect("composite detected");
    assert_eq!(graph.children.len(), 2);

    let db = DBService::new_in_memory().await.unwrap();
    let store = CollectionStore::new(WorkspaceConfig::with_home(home.path().to_path_buf()));
    store.ensure_collection("default").unwrap();

    let importer = PluginImporter::new(db.clone(), store.clone());
    let result = importer
        .import_plugin_transactional(&graph, None, None, "default")
        .await;
    assert!(result.success, "import errors: {:?}", result.errors);
    assert_eq!(result.children_imported, 2);

    // Mirror the artifact content into the collection tree.
    let collection_root = store.collection_path("default");
    for child in &graph.children {
        let container = match child.artifact_type.to_string().as_str() {
            "skill" => "skills",
            "command" => "commands",
            other => panic!("unexpected type {other}"),
        };
        if child.path.is_dir() {
            let dest = collection_root.join(format!("artifacts/{container}/{}", child.name));
            fs::create_dir_all(&dest).unwrap();
            for entry in fs::read_dir(&child.path).unwrap().flatten() {
                fs::copy(entry.path(), dest.join(entry.file_name())).unwrap();
            }
        } else {
            let dest = collection_root.join(format!("artifacts/{container}/{}.md", child.name));
            fs::create_dir_all(dest.parent().unwrap()).unwrap();
            fs::copy(&child.path, &dest).unwrap();
        }
    }
    register_in_manifest(
        &store,
        &[
            ("skill", "alpha", "artifacts/skills/alpha"),
            ("command", "beta", "artifacts/commands/beta.md"),
        ],
    );

    // A deployment set holding both imported artifacts.
    let alpha = Artifact::find_by_id(&db.pool, "skill:alpha")
        .await
        .unwrap()
        .unwrap();
    let beta = Artifact::find_by_id(&db.pool, "command:beta")
        .await
        .unwrap()
        .unwrap();
    let set = DeploymentSet::create(
        &db.pool,
        &CreateDeploymentSet {
            name: "workflow".to_string(),
            description: None,
            owner_id: "tester".to_string(),
            tags: None,
        },
    )
    .await
    .unwrap();
    DeploymentSetMember::add(&db.pool, set.id, Some(alpha.uuid), None, None, 0)
        .await
        .unwrap();
    DeploymentSetMember::add(&db.pool, set.id, Some(beta.uuid), None, None, 1)
        .await
        .unwrap();

    let project = Project::create(
        &db.pool,
        &CreateProject {
            name: "demo".to_string(),
            path: Some(project_dir.path().to_string_lossy().into_owned()),
        },
    )
    .await
    .unwrap();
    let profile = DeploymentProfile::upsert(
        &db.pool,
        &CreateDeploymentProfile {
            project_id: project.id,
            profile_id: "claude_code".to_string(),
            platform: Platform::ClaudeCode,
            root_dir: None,
            artifact_path_map: None,
            config_filenames: None,
            context_prefixes: None,
            supported_types: None,
        },
    )
    .await
    .unwrap();

    let engine = DeploymentEngine::new(db.clone(), store.clone());
    let outcome = engine
        .deploy_set(
            set.id,
            project_dir.path(),
            profile.id,
            &DeployOptions {
                overwrite: false,
                dry_run: false,
                variables: HashMap::new(),
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 0);

    let skill_manifest = project_dir.path().join(".claude/skills/alpha/SKILL.md");
    let command_file = project_dir.path().join(".claude/commands/beta.md");
    assert!(skill_manifest.exists());
    assert!(command_file.exists());

    // The ledger covers both artifacts and carries real hashes.
    let records = tracker::load_records(project_dir.path(), ".claude");
    assert_eq!(records.len(), 2);
    for record in &records {
        let hash = record.content_hash.as_deref().unwrap();
        assert!(ArtifactVersion::find_by_hash(&db.pool, hash)
            .await
            .unwrap()
            .is_some());
    }

    // Re-deploy without overwrite: targets untouched, everything skipped.
    let second = engine
        .deploy_set(
            set.id,
            project_dir.path(),
            profile.id,
            &DeployOptions::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.succeeded, 0);
}
