use ci_artifacts::services::path_resolver::stash_key;
use ci_artifacts::{
    new_build_context, ArchiveCoordinator, ArtifactError, ArtifactSource, BuildIdentity, InMemoryObjectStore,
    NodeWorkspace, RepositoryConfig, ReplayAdapter, RetryPolicy, StashCoordinator, StashOptions, StashSource,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Cluster {
    store: Arc<InMemoryObjectStore>,
    archive: Arc<ArchiveCoordinator>,
    stash: Arc<StashCoordinator>,
}

fn repository() -> RepositoryConfig {
    RepositoryConfig::new("http://localhost:8081", "my-generic-repo").with_prefix("jenkins/")
}

fn cluster() -> Cluster {
    let config = repository();
    let store = Arc::new(InMemoryObjectStore::with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    }));
    Cluster {
        archive: Arc::new(ArchiveCoordinator::new(store.clone(), config.clone())),
        stash: Arc::new(StashCoordinator::new(store.clone(), config)),
        store,
    }
}

fn node(name: &str) -> (TempDir, NodeWorkspace) {
    let dir = tempfile::tempdir().unwrap();
    let ws = NodeWorkspace::new(name, dir.path());
    (dir, ws)
}

fn write(ws: &NodeWorkspace, relative_path: &str, contents: &str) {
    let path = ws.root().join(relative_path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn stash_on_one_node_unstash_on_another() {
    let c = cluster();
    let build = BuildIdentity::new("folder/test Pipeline", 4).unwrap();
    let (_a_dir, agent_a) = node("agent-a");
    let (_b_dir, agent_b) = node("agent-b");

    write(&agent_a, "artifact.txt", "Hello, World!");
    write(&agent_a, "lib/deep/nested file.txt", "nested");

    let stash_ref = c
        .stash
        .stash(
            &build,
            "build-output",
            &agent_a,
            &["artifact.txt".to_string(), "lib/deep/nested file.txt".to_string()],
            &StashOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(stash_ref.owning_build, build);

    let restored = c.stash.unstash(&build, "build-output", &agent_b).await.unwrap();
    assert_eq!(restored, vec!["artifact.txt", "lib/deep/nested file.txt"]);
    assert_eq!(
        std::fs::read_to_string(agent_b.root().join("artifact.txt")).unwrap(),
        "Hello, World!"
    );
    assert_eq!(
        std::fs::read_to_string(agent_b.root().join("lib/deep/nested file.txt")).unwrap(),
        "nested"
    );

    // One bundle object, nothing else.
    let keys = c.store.keys().await;
    assert_eq!(keys.len(), 1);
    assert_eq!(
        keys[0].as_str(),
        "jenkins/folder/test%20Pipeline/4/artifacts/stash/build-output.bundle"
    );
}

#[tokio::test]
async fn unstash_rides_out_dropped_downloads() {
    let c = cluster();
    let build = BuildIdentity::new("job", 3).unwrap();
    let (_a_dir, agent_a) = node("agent-a");
    let (_b_dir, agent_b) = node("agent-b");

    write(&agent_a, "out.bin", "payload");
    c.stash
        .stash(&build, "out", &agent_a, &["out.bin".to_string()], &StashOptions::default())
        .await
        .unwrap();

    let key = stash_key(&repository(), &build, "out").unwrap();
    c.store.fail_gets(&key, 2).await;

    let restored = c.stash.unstash(&build, "out", &agent_b).await.unwrap();
    assert_eq!(restored, vec!["out.bin"]);
    assert_eq!(c.store.get_attempts(&key).await, 3);
}

#[tokio::test]
async fn stash_matching_selects_by_pattern() {
    let c = cluster();
    let build = BuildIdentity::new("job", 1).unwrap();
    let (_a_dir, agent_a) = node("agent-a");
    let (_b_dir, agent_b) = node("agent-b");

    write(&agent_a, "target/app.jar", "jar");
    write(&agent_a, "target/app.log", "log");
    write(&agent_a, "src/main.rs", "fn main() {}");

    c.stash
        .stash_matching(
            &build,
            "jars",
            &agent_a,
            &["target/**".to_string()],
            &["**/*.log".to_string()],
            &StashOptions::default(),
        )
        .await
        .unwrap();

    let restored = c.stash.unstash(&build, "jars", &agent_b).await.unwrap();
    assert_eq!(restored, vec!["target/app.jar"]);
    assert!(!agent_b.root().join("src/main.rs").exists());
}

#[tokio::test]
async fn restash_replaces_previous_contents() {
    let c = cluster();
    let build = BuildIdentity::new("job", 1).unwrap();
    let (_a_dir, agent_a) = node("agent-a");
    let (_b_dir, agent_b) = node("agent-b");

    write(&agent_a, "one.txt", "1");
    write(&agent_a, "two.txt", "2");
    c.stash
        .stash(&build, "s", &agent_a, &["one.txt".to_string()], &StashOptions::default())
        .await
        .unwrap();
    c.stash
        .stash(&build, "s", &agent_a, &["two.txt".to_string()], &StashOptions::default())
        .await
        .unwrap();

    let restored = c.stash.unstash(&build, "s", &agent_b).await.unwrap();
    assert_eq!(restored, vec!["two.txt"]);
    assert!(!agent_b.root().join("one.txt").exists());
}

#[tokio::test]
async fn stashes_of_different_builds_are_isolated() {
    let c = cluster();
    let first = BuildIdentity::new("job", 1).unwrap();
    let second = BuildIdentity::new("job", 2).unwrap();
    let (_a_dir, agent_a) = node("agent-a");

    write(&agent_a, "f.txt", "first");
    c.stash
        .stash(&first, "s", &agent_a, &["f.txt".to_string()], &StashOptions::default())
        .await
        .unwrap();

    let (_b_dir, agent_b) = node("agent-b");
    let err = c.stash.unstash(&second, "s", &agent_b).await.unwrap_err();
    assert!(matches!(err, ArtifactError::StashNotFound { .. }));
}

#[tokio::test]
async fn replay_reuses_original_stash_only_when_asked() {
    let c = cluster();
    let replay = ReplayAdapter::new(c.archive.clone(), c.stash.clone());
    let original = BuildIdentity::new("test Pipeline", 1).unwrap();
    let (_a_dir, agent_a) = node("agent-a");

    write(&agent_a, "compiled.bin", "binary");
    c.stash
        .stash(&original, "compiled", &agent_a, &["compiled.bin".to_string()], &StashOptions::default())
        .await
        .unwrap();

    let ctx = new_build_context(&original, 2).unwrap();
    let (_b_dir, agent_b) = node("agent-b");

    let err = replay
        .unstash(&ctx, "compiled", &agent_b, StashSource::Replayed)
        .await
        .unwrap_err();
    match err {
        ArtifactError::StashNotFound { stash, build } => {
            assert_eq!(stash, "compiled");
            assert_eq!(build.build_number(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    let restored = replay
        .unstash(&ctx, "compiled", &agent_b, StashSource::Original)
        .await
        .unwrap();
    assert_eq!(restored, vec!["compiled.bin"]);
    assert_eq!(
        std::fs::read_to_string(agent_b.root().join("compiled.bin")).unwrap(),
        "binary"
    );
}

#[tokio::test]
async fn replay_writes_under_the_new_build() {
    let c = cluster();
    let replay = ReplayAdapter::new(c.archive.clone(), c.stash.clone());
    let original = BuildIdentity::new("job", 1).unwrap();
    let ctx = new_build_context(&original, 2).unwrap();

    let manifest = replay
        .archive(&ctx, vec![ArtifactSource::new("report.txt", "replayed")])
        .await
        .unwrap();
    assert_eq!(
        manifest.get("report.txt").unwrap().key.as_str(),
        "jenkins/job/2/artifacts/report.txt"
    );

    let (_a_dir, agent_a) = node("agent-a");
    write(&agent_a, "x.txt", "x");
    let stash_ref = replay
        .stash(&ctx, "x", &agent_a, &["x.txt".to_string()], &StashOptions::default())
        .await
        .unwrap();
    assert_eq!(stash_ref.owning_build.build_number(), 2);

    let (_b_dir, agent_b) = node("agent-b");
    assert!(matches!(
        c.stash.unstash(&original, "x", &agent_b).await,
        Err(ArtifactError::StashNotFound { .. })
    ));
}

#[tokio::test]
async fn carried_over_stashes_unstash_without_reuse() {
    let c = cluster();
    let replay = ReplayAdapter::new(c.archive.clone(), c.stash.clone());
    let original = BuildIdentity::new("job", 10).unwrap();
    let (_a_dir, agent_a) = node("agent-a");

    write(&agent_a, "a.txt", "a");
    write(&agent_a, "b.txt", "b");
    for (name, file) in [("first", "a.txt"), ("second", "b.txt")] {
        c.stash
            .stash(&original, name, &agent_a, &[file.to_string()], &StashOptions::default())
            .await
            .unwrap();
    }

    let ctx = new_build_context(&original, 11).unwrap();
    let copied = replay
        .carry_over_stashes(&ctx, &["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(copied.len(), 2);
    assert!(copied.iter().all(|s| s.owning_build == *ctx.replayed()));

    let (_b_dir, agent_b) = node("agent-b");
    let restored = replay
        .unstash(&ctx, "second", &agent_b, StashSource::Replayed)
        .await
        .unwrap();
    assert_eq!(restored, vec!["b.txt"]);

    // The original bundles are left in place.
    assert_eq!(c.store.keys().await.len(), 4);
}

#[tokio::test]
async fn carry_over_of_missing_stash_fails() {
    let c = cluster();
    let replay = ReplayAdapter::new(c.archive.clone(), c.stash.clone());
    let original = BuildIdentity::new("job", 1).unwrap();
    let ctx = new_build_context(&original, 2).unwrap();

    let err = replay
        .carry_over_stashes(&ctx, &["ghost".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::StashNotFound { .. }));
}
