//! Cooperative cancellation at stage boundaries.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use forensic_common::PipelineConfig;
use forensic_engine::jobs::{JobError, JobState};

#[tokio::test]
async fn test_cancel_during_ingest_never_enters_analyzing() {
    let provider = Arc::new(GatedProvider::new());
    let manager = manager_with(provider.clone(), fast_config());

    let job_id = manager.submit(COMPANY, range()).await.unwrap();
    wait_for(&manager, &job_id, |_| provider.waiting.load(Ordering::SeqCst) > 0).await;

    let previous = manager.cancel(&job_id).await.unwrap();
    assert_eq!(previous, JobState::Ingesting);

    // Let the in-flight fetch finish; the next boundary observes the cancellation
    provider.open(1);
    let status = wait_terminal(&manager, &job_id).await;
    assert_eq!(status.state, JobState::Cancelled);

    let transitions = manager.transitions(&job_id).await.unwrap();
    assert_eq!(
        states(&transitions),
        vec![JobState::Created, JobState::Ingesting, JobState::Cancelled]
    );
}

// Single-threaded so the worker yields to this task at the first analysis
// stage, right after publishing ANALYZING.
#[tokio::test(flavor = "current_thread")]
async fn test_cancel_between_analyzing_and_scoring() {
    let manager = manager_with(Arc::new(FlakyProvider::new(0)), fast_config());
    let mut events = manager.subscribe();

    let job_id = manager.submit(COMPANY, range()).await.unwrap();
    loop {
        let event = events.recv().await.unwrap();
        if event.job_id != job_id {
            continue;
        }
        assert!(!event.to.is_terminal(), "job finished before reaching ANALYZING");
        if event.to == JobState::Analyzing {
            assert_eq!(manager.cancel(&job_id).await.unwrap(), JobState::Analyzing);
            break;
        }
    }

    let status = wait_terminal(&manager, &job_id).await;
    assert_eq!(status.state, JobState::Cancelled);
    assert_eq!(status.failure.map(|f| f.code), Some("cancelled".to_string()));

    let transitions = manager.transitions(&job_id).await.unwrap();
    assert!(!states(&transitions).contains(&JobState::Scoring));
    assert_eq!(
        states(&transitions),
        vec![
            JobState::Created,
            JobState::Ingesting,
            JobState::Analyzing,
            JobState::Cancelled
        ]
    );
    assert!(matches!(
        manager.result(&job_id).await,
        Err(JobError::NotReady {
            state: JobState::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_queued_job_before_it_starts() {
    let provider = Arc::new(GatedProvider::new());
    let config = PipelineConfig {
        max_concurrent_jobs: 1,
        ..fast_config()
    };
    let manager = manager_with(provider.clone(), config);

    let running = manager.submit(COMPANY, range()).await.unwrap();
    wait_for(&manager, &running, |_| provider.waiting.load(Ordering::SeqCst) > 0).await;

    let queued = manager.submit(COMPANY, range()).await.unwrap();
    assert_eq!(manager.status(&queued).await.unwrap().state, JobState::Created);

    assert_eq!(manager.cancel(&queued).await.unwrap(), JobState::Created);
    let status = wait_terminal(&manager, &queued).await;
    assert_eq!(status.state, JobState::Cancelled);
    assert_eq!(
        states(&manager.transitions(&queued).await.unwrap()),
        vec![JobState::Created, JobState::Cancelled]
    );

    // The running job is unaffected
    provider.open(1);
    assert_eq!(wait_terminal(&manager, &running).await.state, JobState::Completed);
}

#[tokio::test]
async fn test_cancel_finished_job_is_rejected() {
    let provider = Arc::new(GatedProvider::new());
    provider.open(1);
    let manager = manager_with(provider, fast_config());

    let job_id = manager.submit(COMPANY, range()).await.unwrap();
    assert_eq!(wait_terminal(&manager, &job_id).await.state, JobState::Completed);

    assert!(matches!(
        manager.cancel(&job_id).await,
        Err(JobError::AlreadyTerminal {
            state: JobState::Completed,
            ..
        })
    ));
}
