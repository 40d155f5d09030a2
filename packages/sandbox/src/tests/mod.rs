// ABOUTME: Orchestration test suites run against the in-memory recording provider
// ABOUTME: Shared setup helpers for session, execution, file transfer and reaper tests

mod reaper_tests;

use crate::manager::SessionManager;
use crate::settings::SandboxSettings;
use crate::test_utils::RecordingProvider;
use std::sync::Arc;

pub(crate) fn setup(settings: SandboxSettings) -> (Arc<RecordingProvider>, Arc<SessionManager>) {
    let provider = Arc::new(RecordingProvider::new());
    let manager = Arc::new(SessionManager::new(provider.clone(), settings));
    (provider, manager)
}

pub(crate) fn setup_default() -> (Arc<RecordingProvider>, Arc<SessionManager>) {
    setup(SandboxSettings::default())
}

/// Let spawned background tasks (e.g. discarded sandbox stops) run
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
