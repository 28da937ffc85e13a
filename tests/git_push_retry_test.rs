//! Push-with-rebase-retry behavior against a local bare remote.

use std::path::Path;

use tempfile::TempDir;

use nebulus_swarm::infrastructure::git::GitOps;

async fn git(args: &[&str], cwd: &Path) {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a bare origin plus one clone, seeded with an initial commit on
/// `main`.
async fn setup_remote(root: &Path) -> String {
    let bare = root.join("origin.git");
    std::fs::create_dir_all(&bare).unwrap();
    git(&["init", "--bare", "-b", "main"], &bare).await;

    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(&["init", "-b", "main"], &seed).await;
    git(&["config", "user.name", "Seed"], &seed).await;
    git(&["config", "user.email", "seed@test"], &seed).await;
    std::fs::write(seed.join("base.txt"), "base\n").unwrap();
    git(&["add", "-A"], &seed).await;
    git(&["commit", "-m", "initial"], &seed).await;
    git(
        &["push", bare.to_str().unwrap(), "main:main"],
        &seed,
    )
    .await;

    format!("file://{}", bare.display())
}

async fn clone_workspace(root: &Path, name: &str, origin: &str) -> GitOps {
    let workspace = root.join(name);
    std::fs::create_dir_all(&workspace).unwrap();
    let ops = GitOps::new(&workspace, "org/repo");
    let result = ops.clone_repo(origin).await;
    assert!(result.success, "clone failed: {}", result.error);
    ops.configure_user("Minion test", "minion@nebulus.local").await;
    ops
}

#[tokio::test]
async fn rejected_push_rebases_and_retries() {
    let root = TempDir::new().unwrap();
    let origin = setup_remote(root.path()).await;

    let ours = clone_workspace(root.path(), "ours", &origin).await;
    let theirs = clone_workspace(root.path(), "theirs", &origin).await;

    // The default branch advances while we work.
    std::fs::write(theirs.repo_path().join("theirs.txt"), "theirs\n").unwrap();
    theirs.stage_all().await;
    assert!(theirs.commit("their change", None).await.success);
    assert!(theirs.push("origin", "main").await.success);

    // Our commit on the stale main is rejected, then rebased and pushed.
    std::fs::write(ours.repo_path().join("ours.txt"), "ours\n").unwrap();
    ours.stage_all().await;
    assert!(ours.commit("our change", None).await.success);

    let (result, rebased) = ours.push_with_retry("origin", "main", "main", 2).await;
    assert!(result.success, "push should succeed after rebase: {}", result.error);
    assert!(rebased, "a rebase should have happened");

    // Both commits are now on the remote.
    let verify = clone_workspace(root.path(), "verify", &origin).await;
    assert!(verify.repo_path().join("theirs.txt").exists());
    assert!(verify.repo_path().join("ours.txt").exists());
}

#[tokio::test]
async fn conflicting_rebase_aborts_and_surfaces_failure() {
    let root = TempDir::new().unwrap();
    let origin = setup_remote(root.path()).await;

    let ours = clone_workspace(root.path(), "ours", &origin).await;
    let theirs = clone_workspace(root.path(), "theirs", &origin).await;

    // Both sides rewrite the same file.
    std::fs::write(theirs.repo_path().join("base.txt"), "their version\n").unwrap();
    theirs.stage_all().await;
    assert!(theirs.commit("their conflicting change", None).await.success);
    assert!(theirs.push("origin", "main").await.success);

    std::fs::write(ours.repo_path().join("base.txt"), "our version\n").unwrap();
    ours.stage_all().await;
    assert!(ours.commit("our conflicting change", None).await.success);

    let (result, rebased) = ours.push_with_retry("origin", "main", "main", 2).await;
    assert!(!result.success, "conflicting push must fail");
    assert!(!rebased);

    // The workspace is usable after the aborted rebase.
    assert_eq!(ours.current_branch().await, "main");
}
