use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use speech_practice::cache::TtlCache;
use speech_practice::db;
use speech_practice::error::PipelineError;
use speech_practice::events::EventEmitter;
use speech_practice::model::AudioFormat;
use speech_practice::queue::{PipelineContext, PipelineSettings, QueueProcessor};
use speech_practice::quota::Tier;
use speech_practice::storage::FsStorage;
use speech_practice::store::RecordingStore;
use speech_practice::upload::{PipelineService, UploadRequest};

struct Harness {
    service: PipelineService,
    ctx: Arc<PipelineContext>,
    _db_guard: tempfile::TempDir,
    _storage_guard: tempfile::TempDir,
}

async fn setup() -> Harness {
    let (pool, db_guard) = db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    db::init_database_schema(&pool).await.unwrap();
    db::ensure_schema_version(&pool).await.unwrap();

    let storage_guard = tempfile::tempdir().unwrap();
    let ctx = Arc::new(PipelineContext {
        store: RecordingStore::new(pool),
        storage: Arc::new(FsStorage::new(storage_guard.path())),
        transcriber: None,
        cache: Arc::new(TtlCache::new(Duration::from_secs(60))),
        events: EventEmitter::default(),
        settings: PipelineSettings::default(),
    });
    let queue = QueueProcessor::start(ctx.clone(), 1);
    Harness {
        service: PipelineService::new(ctx.clone(), queue),
        ctx,
        _db_guard: db_guard,
        _storage_guard: storage_guard,
    }
}

fn request(user: &str, session: Uuid, bytes: Vec<u8>) -> UploadRequest {
    UploadRequest {
        user_id: user.to_string(),
        session_id: session,
        sentence_index: 0,
        sentence_start_time: 0.0,
        sentence_end_time: 5.0,
        bytes,
        declared_format: "audio/mpeg".to_string(),
        target_format: None,
    }
}

#[tokio::test]
async fn unowned_session_is_not_found() {
    let harness = setup().await;
    let session = harness.service.create_session("alice").await.unwrap();

    let err = harness
        .service
        .upload_recording(Tier::Free, request("mallory", session, vec![0u8; 16]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let harness = setup().await;
    let err = harness
        .service
        .upload_recording(Tier::Free, request("alice", Uuid::new_v4(), vec![0u8; 16]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn unsupported_declared_format_is_rejected() {
    let harness = setup().await;
    let session = harness.service.create_session("alice").await.unwrap();

    let mut req = request("alice", session, vec![0u8; 16]);
    req.declared_format = "audio/flac".to_string();
    let err = harness
        .service
        .upload_recording(Tier::Free, req)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
}

#[tokio::test]
async fn oversized_payload_is_rejected_with_no_partial_state() {
    let harness = setup().await;
    let session = harness.service.create_session("alice").await.unwrap();

    // Free tier caps files at 10 MB
    let err = harness
        .service
        .upload_recording(
            Tier::Free,
            request("alice", session, vec![0u8; 11 * 1024 * 1024]),
        )
        .await
        .unwrap_err();
    match err {
        PipelineError::FileTooLarge { actual, limit } => {
            assert_eq!(actual, 11 * 1024 * 1024);
            assert_eq!(limit, 10 * 1024 * 1024);
        }
        other => panic!("expected FileTooLarge, got {}", other),
    }
    assert!(harness
        .service
        .session_recordings("alice", session)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn exhausted_daily_quota_reports_daily_reason() {
    let harness = setup().await;
    let session = harness.service.create_session("alice").await.unwrap();

    // Free tier allows 10 recordings per UTC day
    for i in 0..10 {
        harness
            .ctx
            .store
            .insert_recording("alice", session, i, 0.0, 5.0, AudioFormat::Mp3, 1024)
            .await
            .unwrap();
    }

    let err = harness
        .service
        .upload_recording(Tier::Free, request("alice", session, vec![0u8; 1024]))
        .await
        .unwrap_err();
    match err {
        PipelineError::RecordingLimitExceeded(snapshot) => {
            assert!(!snapshot.can_record);
            assert_eq!(snapshot.limit_reason.as_deref(), Some("daily"));
            assert_eq!(snapshot.current_usage.daily_count, 10);
        }
        other => panic!("expected RecordingLimitExceeded, got {}", other),
    }
}

#[tokio::test]
async fn exhausted_storage_quota_reports_storage_reason() {
    let harness = setup().await;
    let session = harness.service.create_session("alice").await.unwrap();

    // One huge recording puts the free tier over its 0.5 GB storage quota
    harness
        .ctx
        .store
        .insert_recording(
            "alice",
            session,
            0,
            0.0,
            5.0,
            AudioFormat::Mp3,
            600 * 1024 * 1024,
        )
        .await
        .unwrap();

    let err = harness
        .service
        .upload_recording(Tier::Free, request("alice", session, vec![0u8; 1024]))
        .await
        .unwrap_err();
    match err {
        PipelineError::RecordingLimitExceeded(snapshot) => {
            assert_eq!(snapshot.limit_reason.as_deref(), Some("storage"));
        }
        other => panic!("expected RecordingLimitExceeded, got {}", other),
    }
}

#[tokio::test]
async fn premium_tier_has_no_daily_limit() {
    let harness = setup().await;
    let session = harness.service.create_session("alice").await.unwrap();

    for i in 0..12 {
        harness
            .ctx
            .store
            .insert_recording("alice", session, i, 0.0, 5.0, AudioFormat::Mp3, 1024)
            .await
            .unwrap();
    }

    // 12 recordings today would block Free but not Premium; the upload then
    // proceeds all the way to a stored Processing row.
    let recording = harness
        .service
        .upload_recording(Tier::Premium, request("alice", session, vec![0u8; 1024]))
        .await
        .unwrap();
    assert_eq!(
        harness
            .ctx
            .storage
            .get(&recording.audio_url)
            .await
            .unwrap()
            .len(),
        1024
    );
}
