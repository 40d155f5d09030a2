use super::setup;
use crate::providers::ProviderError;
use crate::reaper::spawn_reaper;
use crate::settings::{SandboxSettings, StorageMode};
use crate::test_utils::Op;
use std::time::Duration;
use tempfile::TempDir;

const TTL: Duration = Duration::from_secs(3600);

fn settings() -> SandboxSettings {
    SandboxSettings {
        session_ttl: TTL,
        ..SandboxSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_idle_past_ttl_is_reaped() {
    let (provider, manager) = setup(settings());
    let handle = manager.create("s1").await.unwrap();

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    let reaped = manager.cleanup_sessions().await;

    assert_eq!(reaped, 1);
    assert!(!manager.registry().contains("s1"));
    let stops = provider.calls_of(Op::Stop);
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].container_id, handle.id);
    assert_eq!(stops[0].args, vec!["10"]);
}

#[tokio::test(start_paused = true)]
async fn test_session_within_ttl_is_kept() {
    let (provider, manager) = setup(settings());
    manager.create("s1").await.unwrap();

    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    let reaped = manager.cleanup_sessions().await;

    assert_eq!(reaped, 0);
    assert!(manager.registry().contains("s1"));
    assert_eq!(provider.count(Op::Stop), 0);
}

#[tokio::test(start_paused = true)]
async fn test_access_resets_idle_clock() {
    let (_provider, manager) = setup(settings());
    manager.create("s1").await.unwrap();
    manager.create("s2").await.unwrap();

    tokio::time::advance(TTL - Duration::from_secs(10)).await;
    manager.get_or_create("s1", false).await.unwrap();
    tokio::time::advance(Duration::from_secs(20)).await;

    assert_eq!(manager.cleanup_sessions().await, 1);
    assert!(manager.registry().contains("s1"));
    assert!(!manager.registry().contains("s2"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_failure_still_frees_registry_slot() {
    let (provider, manager) = setup(SandboxSettings {
        max_sessions: 1,
        ..settings()
    });
    manager.create("s1").await.unwrap();
    provider.fail_next(Op::Stop, ProviderError::Api("stuck".to_string()));

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    assert_eq!(manager.cleanup_sessions().await, 1);

    assert!(manager.registry().is_empty());
    assert!(manager.create("s2").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_session_does_not_block_others() {
    let (provider, manager) = setup(settings());
    manager.create("s1").await.unwrap();
    manager.create("s2").await.unwrap();
    provider.fail_next(Op::Stop, ProviderError::Connection("socket closed".to_string()));

    tokio::time::advance(TTL + Duration::from_secs(1)).await;

    assert_eq!(manager.cleanup_sessions().await, 2);
    assert_eq!(provider.count(Op::Stop), 2);
    assert!(manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reaping_drops_identity_mappings() {
    let (_provider, manager) = setup(settings());
    manager.create("s1").await.unwrap();
    let public = manager.public_session_id("s1");
    let file_id = manager.file_id("s1", "out.csv");

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    manager.cleanup_sessions().await;

    // The public id no longer resolves to the reaped session
    assert_eq!(manager.resolve_session_id(&public), public);
    assert_eq!(manager.resolve_file("s1", &file_id).unwrap(), file_id);
}

#[tokio::test(start_paused = true)]
async fn test_reaping_removes_shared_volume_directory() {
    let dir = TempDir::new().unwrap();
    let (_provider, manager) = setup(SandboxSettings {
        storage: StorageMode::SharedVolume {
            host_dir: dir.path().to_path_buf(),
            local_dir: dir.path().to_path_buf(),
        },
        ..settings()
    });
    manager.upload("s1", "a.txt", b"a").await.unwrap();
    assert!(dir.path().join("s1").join("a.txt").exists());

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    manager.cleanup_sessions().await;

    assert!(!dir.path().join("s1").exists());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_reaper_sweeps_periodically() {
    let (provider, manager) = setup(SandboxSettings {
        session_ttl: Duration::from_secs(30),
        ..SandboxSettings::default()
    });
    manager.create("s1").await.unwrap();

    let reaper = spawn_reaper(manager.clone(), Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(manager.registry().contains("s1"));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!manager.registry().contains("s1"));
    assert_eq!(provider.count(Op::Stop), 1);

    reaper.abort();
}
