use std::collections::HashSet;
use std::path::Path;

use nbstore_common::path::VirtualPath;
use nbstore_common::types::{DocumentContent, DocumentType};
use nbstore_daemon::config::StoreConfig;
use nbstore_daemon::store::{ContentsStore, StoreError};
use serde_json::json;
use tempfile::TempDir;

/// Directories every scenario runs in: plain, nested, spaces and non-ASCII.
const DIRS: &[&str] = &["", "Directory with spaces in", "unicodé", "foo", "foo/bar", "å b"];

/// Documents seeded into every fixture directory.
const SEEDED: &[&str] = &["inroot.ipynb", "a.ipynb", "name with spaces.ipynb", "unicodé.ipynb"];

fn fixture() -> (TempDir, ContentsStore) {
    let tmp = tempfile::tempdir().expect("fixture root should be created");
    for dir in DIRS {
        let path = tmp.path().join(dir);
        std::fs::create_dir_all(&path).expect("fixture directory should be created");
        for name in SEEDED {
            seed(&path, name);
        }
    }
    let store = ContentsStore::open(StoreConfig::with_root(tmp.path())).expect("store should open");
    (tmp, store)
}

fn seed(dir: &Path, name: &str) {
    let stem = name.trim_end_matches(".ipynb");
    let body = json!({
        "metadata": { "name": stem },
        "nbformat": 3,
        "nbformat_minor": 0,
        "worksheets": [],
    });
    std::fs::write(dir.join(name), serde_json::to_vec_pretty(&body).unwrap())
        .expect("fixture document should be written");
}

fn vp(raw: &str) -> VirtualPath {
    VirtualPath::parse(raw).expect("fixture path should parse")
}

fn notebook_with_heading(text: &str) -> DocumentContent {
    DocumentContent::json(json!({
        "metadata": { "name": "" },
        "nbformat": 3,
        "nbformat_minor": 0,
        "worksheets": [{ "cells": [{ "cell_type": "heading", "level": 1, "source": text }] }],
    }))
}

async fn listed_names(store: &ContentsStore, dir: &str) -> HashSet<String> {
    store
        .list(&vp(dir))
        .await
        .expect("listing should succeed")
        .into_iter()
        .map(|model| model.name)
        .collect()
}

#[tokio::test]
async fn lists_seeded_documents_in_every_directory() {
    let (_tmp, store) = fixture();
    for dir in DIRS {
        let models = store.list(&vp(dir)).await.expect("listing should succeed");
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        let mut expected = SEEDED.to_vec();
        expected.sort();
        assert_eq!(names, expected, "listing of `{dir}`");

        for model in &models {
            assert_eq!(model.path, *dir);
            assert_eq!(model.kind, DocumentType::Notebook);
            assert!(model.content.is_none());
        }
    }
}

#[tokio::test]
async fn listing_missing_directory_is_not_found() {
    let (_tmp, store) = fixture();
    let error = store.list(&vp("nonexistant")).await.expect_err("listing should fail");
    assert!(matches!(error, StoreError::NotFound { kind: "directory", .. }));
}

#[tokio::test]
async fn reads_seeded_documents_with_content() {
    let (_tmp, store) = fixture();
    for dir in DIRS {
        for name in SEEDED {
            let model = store.read(&vp(dir), name).await.expect("read should succeed");
            assert_eq!(model.name, *name);
            assert_eq!(model.path, *dir);
            let content = model.content.expect("read returns content");
            assert_eq!(content["metadata"]["name"], name.trim_end_matches(".ipynb"));
        }
    }
}

#[tokio::test]
async fn untitled_creates_number_from_zero_in_each_directory() {
    let (tmp, store) = fixture();
    for dir in DIRS {
        let first = store.create(&vp(dir), None, None).await.expect("create should succeed");
        let second = store.create(&vp(dir), None, None).await.expect("create should succeed");
        assert_eq!(first.name, "Untitled0.ipynb");
        assert_eq!(second.name, "Untitled1.ipynb");
        assert!(tmp.path().join(dir).join("Untitled1.ipynb").is_file());
    }
}

#[tokio::test]
async fn concurrent_untitled_creates_yield_distinct_names() {
    let (_tmp, store) = fixture();
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.create(&vp("å b"), None, None).await })
        })
        .collect();

    let mut names = HashSet::new();
    for task in tasks {
        let model = task.await.expect("task should not panic").expect("create should succeed");
        assert!(names.insert(model.name.clone()), "duplicate name {}", model.name);
    }
    let expected: HashSet<String> = (0..20).map(|n| format!("Untitled{n}.ipynb")).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn upload_then_save_round_trips_content() {
    let (tmp, store) = fixture();
    for dir in DIRS {
        let name = "Upload tést.ipynb";
        store
            .create(&vp(dir), Some(name), Some(notebook_with_heading("uploaded")))
            .await
            .expect("upload should succeed");
        store
            .save(&vp(dir), name, notebook_with_heading("Created by test ³"), None, None)
            .await
            .expect("save should succeed");

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(tmp.path().join(dir).join(name)).unwrap()).unwrap();
        assert_eq!(on_disk["worksheets"][0]["cells"][0]["source"], "Created by test ³");

        let model = store.read(&vp(dir), name).await.expect("read should succeed");
        assert_eq!(model.content(), Some(notebook_with_heading("Created by test ³")));
    }
}

#[tokio::test]
async fn copy_allocates_copy_names() {
    let (_tmp, store) = fixture();
    let first = store.copy(&vp("foo"), "a.ipynb", None).await.expect("copy should succeed");
    let second = store.copy(&vp("foo"), "a.ipynb", None).await.expect("copy should succeed");
    assert_eq!(first.name, "a-Copy0.ipynb");
    assert_eq!(second.name, "a-Copy1.ipynb");

    let copied = store.copy(&vp("å b"), "unicodé.ipynb", Some("cøpy.ipynb")).await.unwrap();
    assert_eq!(copied.name, "cøpy.ipynb");
    assert_eq!(
        store.read(&vp("å b"), "cøpy.ipynb").await.unwrap().content,
        store.read(&vp("å b"), "unicodé.ipynb").await.unwrap().content
    );
}

#[tokio::test]
async fn rename_on_save_across_directories() {
    let (_tmp, store) = fixture();
    let saved = store
        .save(
            &vp("foo"),
            "a.ipynb",
            notebook_with_heading("moved"),
            Some("renamed.ipynb"),
            Some(&vp("unicodé")),
        )
        .await
        .expect("rename-on-save should succeed");
    assert_eq!(saved.path, "unicodé");
    assert_eq!(saved.name, "renamed.ipynb");

    assert!(store.read(&vp("foo"), "a.ipynb").await.unwrap_err().is_not_found());
    let moved = store.read(&vp("unicodé"), "renamed.ipynb").await.unwrap();
    assert_eq!(moved.content(), Some(notebook_with_heading("moved")));
}

#[tokio::test]
async fn save_into_missing_directory_is_not_found() {
    let (_tmp, store) = fixture();
    let error = store
        .save(&vp("foo"), "a.ipynb", notebook_with_heading("x"), None, Some(&vp("nonexistant")))
        .await
        .expect_err("save should fail");
    assert!(error.is_not_found());
    assert!(store.read(&vp("foo"), "a.ipynb").await.is_ok());
}

#[tokio::test]
async fn rename_and_delete_in_every_directory() {
    let (_tmp, store) = fixture();
    for dir in DIRS {
        store.rename(&vp(dir), "a.ipynb", "z.ipynb").await.expect("rename should succeed");
        let names = listed_names(&store, dir).await;
        assert!(names.contains("z.ipynb"));
        assert!(!names.contains("a.ipynb"));

        store.delete(&vp(dir), "z.ipynb").await.expect("delete should succeed");
        assert!(!listed_names(&store, dir).await.contains("z.ipynb"));
        assert!(store.delete(&vp(dir), "z.ipynb").await.unwrap_err().is_not_found());
    }
}

#[tokio::test]
async fn rename_onto_existing_document_conflicts() {
    let (_tmp, store) = fixture();
    let error = store.rename(&vp("foo"), "a.ipynb", "inroot.ipynb").await.expect_err("conflict");
    assert!(error.is_conflict());
    assert!(listed_names(&store, "foo").await.contains("a.ipynb"));
}

#[tokio::test]
async fn unrecognized_names_are_invalid() {
    let (_tmp, store) = fixture();
    let error = store.create(&vp("foo"), Some("README"), None).await.expect_err("invalid");
    assert!(matches!(error, StoreError::InvalidArgument(_)));
    let error = store.read(&vp("foo/.ipynb_checkpoints"), "a.ipynb").await.expect_err("invalid");
    assert!(matches!(error, StoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn concurrent_copies_yield_distinct_names() {
    let (_tmp, store) = fixture();
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.copy(&vp("å b"), "a.ipynb", None).await })
        })
        .collect();

    let mut names = HashSet::new();
    for task in tasks {
        let model = task.await.expect("task should not panic").expect("copy should succeed");
        assert!(names.insert(model.name.clone()), "duplicate name {}", model.name);
    }
    let expected: HashSet<String> = (0..20).map(|n| format!("a-Copy{n}.ipynb")).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn decomposed_document_names_are_reachable_by_listed_name() {
    let (tmp, store) = fixture();
    let decomposed = "cafe\u{0301}.ipynb";
    let composed = "caf\u{00e9}.ipynb";
    seed(&tmp.path().join("foo"), decomposed);

    assert!(listed_names(&store, "foo").await.contains(composed));
    let model = store.read(&vp("foo"), composed).await.expect("read should succeed");
    assert_eq!(model.name, composed);
    assert!(store.exists(&vp("foo"), composed).await.unwrap());

    store
        .save(&vp("foo"), composed, notebook_with_heading("saved"), None, None)
        .await
        .expect("save should succeed");
    let on_disk: serde_json::Value =
        serde_json::from_slice(&std::fs::read(tmp.path().join("foo").join(decomposed)).unwrap()).unwrap();
    assert_eq!(on_disk["worksheets"][0]["cells"][0]["source"], "saved");
    assert!(!tmp.path().join("foo").join(composed).exists());

    let checkpoints = store.checkpoints();
    let checkpoint = checkpoints.create(&vp("foo"), composed).await.expect("checkpoint should succeed");
    store.save(&vp("foo"), composed, notebook_with_heading("later"), None, None).await.unwrap();
    checkpoints.restore(&vp("foo"), composed, &checkpoint.id).await.expect("restore should succeed");
    let restored = store.read(&vp("foo"), composed).await.unwrap();
    assert_eq!(restored.content(), Some(notebook_with_heading("saved")));

    let error = store.create(&vp("foo"), Some(composed), None).await.expect_err("name is taken");
    assert!(error.is_conflict());

    store.rename(&vp("foo"), composed, "renamed.ipynb").await.expect("rename should succeed");
    assert!(!tmp.path().join("foo").join(decomposed).exists());
    let names = listed_names(&store, "foo").await;
    assert!(names.contains("renamed.ipynb"));
    assert!(!names.contains(composed));
}

#[tokio::test]
async fn decomposed_directories_are_reachable_by_composed_path() {
    let (tmp, store) = fixture();
    let on_disk = tmp.path().join("re\u{0301}sume\u{0301}");
    std::fs::create_dir(&on_disk).unwrap();
    seed(&on_disk, "a.ipynb");
    let dir = "r\u{00e9}sum\u{00e9}";

    assert_eq!(listed_names(&store, dir).await, HashSet::from(["a.ipynb".to_string()]));
    let model = store.read(&vp(dir), "a.ipynb").await.expect("read should succeed");
    assert_eq!(model.path, dir);

    let created = store.create(&vp(dir), None, None).await.expect("create should succeed");
    assert_eq!(created.name, "Untitled0.ipynb");
    assert!(on_disk.join("Untitled0.ipynb").is_file());

    store.checkpoints().create(&vp(dir), "a.ipynb").await.expect("checkpoint should succeed");
    assert_eq!(store.checkpoints().list(&vp(dir), "a.ipynb").await.unwrap().len(), 1);

    store
        .save(&vp(dir), "a.ipynb", notebook_with_heading("moved"), Some("b.ipynb"), Some(&vp("foo")))
        .await
        .expect("rename-on-save should succeed");
    assert!(!on_disk.join("a.ipynb").exists());
    assert!(store.read(&vp("foo"), "b.ipynb").await.is_ok());
}

#[tokio::test]
async fn hidden_document_names_are_invalid() {
    let (tmp, store) = fixture();
    let error = store.create(&vp(""), Some(".secret.ipynb"), None).await.expect_err("invalid");
    assert!(matches!(error, StoreError::InvalidArgument(_)));
    assert!(!tmp.path().join(".secret.ipynb").exists());

    let error = store.copy(&vp("foo"), "a.ipynb", Some(".a.ipynb")).await.expect_err("invalid");
    assert!(matches!(error, StoreError::InvalidArgument(_)));
}
