//! Exercises `SafetyValidator::validate` against a mocked git/docker
//! subprocess layer: repo cleanliness and docker version gate an exploration
//! before any worktree or container work starts.

use std::path::PathBuf;

use expedition::error::ExplorationError;
use expedition::model::ExplorationConfig;
use expedition::orchestrator::SafetyValidator;
use expedition::subprocess::SubprocessManager;

#[tokio::test]
async fn passes_with_clean_repo_and_supported_docker() {
    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", ""); // status --porcelain, empty = clean
    mock.expect_success("docker", "Docker version 24.0.7, build afdd53b");

    let validator = SafetyValidator::new(PathBuf::from("/repo"), &subprocess);
    let config = ExplorationConfig { branches: 1, memory_limit: "256m".into(), ..Default::default() };

    validator.validate(&config).await.unwrap();
}

#[tokio::test]
async fn rejects_dirty_repository() {
    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", " M src/lib.rs\n"); // dirty working tree

    let validator = SafetyValidator::new(PathBuf::from("/repo"), &subprocess);
    let config = ExplorationConfig { branches: 1, ..Default::default() };

    let err = validator.validate(&config).await.unwrap_err();
    assert!(matches!(err, ExplorationError::Safety(_)));
    // Docker is never checked once the repo is already dirty.
    assert_eq!(mock.call_count("docker"), 0);
}

#[tokio::test]
async fn rejects_docker_older_than_minimum() {
    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", "");
    mock.expect_success("docker", "Docker version 19.3.2, build abc");

    let validator = SafetyValidator::new(PathBuf::from("/repo"), &subprocess);
    let config = ExplorationConfig { branches: 1, ..Default::default() };

    let err = validator.validate(&config).await.unwrap_err();
    assert!(matches!(err, ExplorationError::Safety(_)));
}

#[tokio::test]
async fn rejects_zero_branches() {
    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_success("git", "");
    mock.expect_success("docker", "Docker version 24.0.7, build afdd53b");

    let validator = SafetyValidator::new(PathBuf::from("/repo"), &subprocess);
    let config = ExplorationConfig { branches: 0, memory_limit: "256m".into(), ..Default::default() };

    let err = validator.validate(&config).await.unwrap_err();
    assert!(matches!(err, ExplorationError::Validation(_)));
}
