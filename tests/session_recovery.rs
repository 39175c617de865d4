use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use music_stream_gateway::api::mock::MockProvider;
use music_stream_gateway::error::GatewayError;
use music_stream_gateway::recovery::{load_with_recovery, SessionCell, SessionState};

#[tokio::test]
async fn one_session_failure_is_recovered() {
    let p = MockProvider::new("Mock")
        .with_audio(vec![1, 2, 3], 3, 160)
        .with_session_failures(1);
    let track = load_with_recovery(&p, "abcdefghijk").await.expect("recovered");
    assert_eq!(track.duration_secs, 3);
    assert_eq!(p.reinit_count(), 1);
}

#[tokio::test]
async fn second_session_failure_becomes_upstream_failure() {
    let p = MockProvider::new("Mock").with_session_failures(2);
    let err = load_with_recovery(&p, "abcdefghijk").await.expect_err("should fail");
    assert!(matches!(err, GatewayError::UpstreamFailure(_)));
    assert_eq!(p.reinit_count(), 1);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let p = MockProvider::new("Mock");
    let err = load_with_recovery(&p, "missing0000").await.expect_err("should fail");
    assert!(matches!(err, GatewayError::NotFound(_)));
    assert_eq!(p.reinit_count(), 0);
}

#[tokio::test]
async fn healthy_session_is_not_rebuilt() {
    let p = MockProvider::new("Mock").with_audio(vec![0; 16], 1, 8);
    load_with_recovery(&p, "abcdefghijk").await.expect("load");
    assert_eq!(p.reinit_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_of_one_generation_build_once() {
    let cell: Arc<SessionCell<u32>> = Arc::new(SessionCell::new());
    let builds = Arc::new(AtomicU32::new(0));

    let (_, gen) = {
        let builds = builds.clone();
        cell.get_or_init(|| async move {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(1u32)
        })
        .await
        .expect("init")
    };
    assert_eq!(gen, 1);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cell = cell.clone();
        let builds = builds.clone();
        handles.push(tokio::spawn(async move {
            cell.refresh(gen, || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(builds.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await
            .expect("refresh")
        }));
    }
    for h in handles {
        let (session, g) = h.await.expect("join");
        assert_eq!(*session, 2);
        assert_eq!(g, 2);
    }
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(cell.generation(), 2);
    assert_eq!(cell.state(), SessionState::Ready);
}

#[tokio::test]
async fn failed_build_keeps_previous_generation() {
    let cell: SessionCell<u32> = SessionCell::new();
    cell.get_or_init(|| async { Ok(7u32) }).await.expect("init");
    let res = cell
        .refresh(1, || async { Err(GatewayError::SessionFailure("denied".into())) })
        .await;
    assert!(res.is_err());
    assert_eq!(cell.generation(), 1);
    let (s, g) = cell.get_or_init(|| async { Ok(0u32) }).await.expect("existing");
    assert_eq!((*s, g), (7, 1));
}

#[tokio::test]
async fn abandoned_rebuild_does_not_stay_reinitializing() {
    let cell: Arc<SessionCell<u32>> = Arc::new(SessionCell::new());
    let rebuilding = cell.clone();
    let task = tokio::spawn(async move {
        rebuilding
            .refresh(0, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1u32)
            })
            .await
    });

    for _ in 0..200 {
        if cell.state() == SessionState::Reinitializing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cell.state(), SessionState::Reinitializing);

    task.abort();
    assert!(task.await.is_err());
    assert_eq!(cell.state(), SessionState::Ready);
    assert_eq!(cell.generation(), 0);

    // The cell is still usable afterwards.
    let (s, g) = cell.get_or_init(|| async { Ok(5u32) }).await.expect("init");
    assert_eq!((*s, g), (5, 1));
}
