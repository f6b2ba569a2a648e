//! Integration tests for the project-level API.

use std::fs;
use tempfile::TempDir;

use omni_knowledge::{
    ContentType, NoteFragment, Observation, ProjectContext, RelationDraft, SearchQuery,
    SyncConfig, SyncError, parse_note,
};

async fn project(dir: &TempDir) -> ProjectContext {
    let project = ProjectContext::open(dir.path(), SyncConfig::default()).unwrap();
    project.sync_full().await.unwrap();
    project
}

#[tokio::test]
async fn test_open_creates_state_dir() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;
    assert!(dir.path().join(".omni-knowledge/graph.db").is_file());
    assert_eq!(project.project_root(), dir.path().canonicalize().unwrap());
    assert_eq!(project.stats().unwrap().entities, 0);
}

#[tokio::test]
async fn test_write_move_delete_note() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;

    let created = project
        .write_note("inbox/idea.md", "# Idea\n\n- [fact] written through the API\n")
        .await
        .unwrap();
    assert_eq!(created.entity.permalink, "inbox/idea");
    assert_eq!(created.observations.len(), 1);
    assert!(dir.path().join("inbox/idea.md").is_file());

    let updated = project
        .write_note("inbox/idea.md", "# Idea\n\n- [fact] rewritten\n")
        .await
        .unwrap();
    assert_eq!(updated.entity.id, created.entity.id);
    assert_eq!(updated.observations[0].content, "rewritten");

    let moved = project
        .move_note("inbox/idea.md", "projects/idea.md")
        .await
        .unwrap();
    assert_eq!(moved.entity.id, created.entity.id);
    assert_eq!(moved.entity.file_path, "projects/idea.md");
    assert_eq!(moved.entity.permalink, "projects/idea");
    assert!(!dir.path().join("inbox/idea.md").exists());

    assert!(project.delete_note("projects/idea.md").await.unwrap());
    assert!(!project.delete_note("projects/idea.md").await.unwrap());
    assert_eq!(project.stats().unwrap().entities, 0);
}

#[tokio::test]
async fn test_move_onto_existing_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;
    project.write_note("a.md", "# A\n").await.unwrap();
    project.write_note("b.md", "# B\n").await.unwrap();
    assert!(matches!(
        project.move_note("a.md", "b.md").await,
        Err(SyncError::ConstraintViolation { .. })
    ));
    assert!(matches!(
        project.move_note("missing.md", "c.md").await,
        Err(SyncError::Io(_))
    ));
}

#[tokio::test]
async fn test_paths_outside_root_are_rejected() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;
    for bad in ["../escape.md", "/tmp/escape.md", "a/../../escape.md"] {
        assert!(
            matches!(
                project.write_note(bad, "# nope\n").await,
                Err(SyncError::PathTraversal(_))
            ),
            "{bad} accepted"
        );
    }
    assert!(matches!(
        project.write_note(".omni-knowledge/graph.md", "# nope\n").await,
        Err(SyncError::Ignored(_))
    ));
    assert!(matches!(
        project.get_by_path("../x.md"),
        Err(SyncError::PathTraversal(_))
    ));
}

#[tokio::test]
async fn test_rejected_note_reports_its_error() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;
    project
        .write_note("one.md", "---\npermalink: taken\n---\n# One\n")
        .await
        .unwrap();
    let err = project
        .write_note("two.md", "---\npermalink: taken\n---\n# Two\n")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConstraintViolation { ref path, .. } if path == "two.md"));
    assert!(dir.path().join("two.md").is_file());
}

#[tokio::test]
async fn test_write_fragment_round_trips() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;

    let mut fragment = NoteFragment::new("Design Notes");
    fragment.tags = vec!["arch".to_string()];
    fragment.observations = vec![Observation {
        tags: vec!["sqlite".to_string()],
        context: Some("v1".to_string()),
        ..Observation::new("decision", "store the graph in SQLite")
    }];
    fragment.relations = vec![RelationDraft::new("part_of", "Architecture")];

    let record = project
        .write_fragment("design.md", &fragment, "Some prose.\n")
        .await
        .unwrap();
    assert_eq!(record.entity.title, "Design Notes");
    assert_eq!(record.observations, fragment.observations);
    assert_eq!(record.outgoing.len(), 1);
    assert_eq!(record.outgoing[0].to_name, "Architecture");

    let text = fs::read_to_string(dir.path().join("design.md")).unwrap();
    assert_eq!(parse_note(&text, "design.md").fragment, fragment);
}

#[tokio::test]
async fn test_reads_traversal_listing_and_search() {
    let dir = TempDir::new().unwrap();
    let project = project(&dir).await;
    project
        .write_note("hub.md", "# Hub\n\n- links_to [[Spoke One]]\n- links_to [[Spoke Two]]\n")
        .await
        .unwrap();
    project
        .write_note("spokes/one.md", "# Spoke One\n\nTalks about tokio runtimes.\n\n- links_to [[Leaf]]\n")
        .await
        .unwrap();
    project.write_note("spokes/two.md", "# Spoke Two\n").await.unwrap();
    project.write_note("spokes/deep/leaf.md", "# Leaf\n").await.unwrap();
    fs::write(dir.path().join("spokes/photo.jpg"), [0xff, 0xd8, 0x00, 0x01]).unwrap();
    project.sync_full().await.unwrap();

    let hub = project.get_by_permalink("hub").unwrap().unwrap();
    let near = project.neighbors(hub.entity.id, 1).unwrap();
    assert_eq!(near.len(), 2);
    let far = project.neighbors(hub.entity.id, 2).unwrap();
    assert_eq!(far.len(), 3);
    assert_eq!(far.iter().filter(|n| n.distance == 2).count(), 1);

    let listing = project.list_directory("spokes", 1).unwrap();
    let names: Vec<(&str, bool)> = listing.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
    assert_eq!(
        names,
        vec![("deep", true), ("one.md", false), ("photo.jpg", false), ("two.md", false)]
    );
    assert_eq!(project.list_directory("", 1).unwrap().len(), 2);

    let photo = project.get_by_path("spokes/photo.jpg").unwrap().unwrap();
    assert_eq!(photo.entity.content_type, ContentType::Binary);
    assert_eq!(photo.entity.entity_type, "file");

    let hits = project.search(&SearchQuery::new("tokio")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].permalink, "spokes/one");
    let hits = project.search(&SearchQuery::new("photo").with_type("file")).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(project.search(&SearchQuery::new("AND OR")).unwrap().is_empty());
}
