use chrono::Utc;
use speech_practice::db;
use speech_practice::model::{
    AnalysisResult, AudioFormat, FactorScores, RecordingStatus,
};
use speech_practice::queries::recordings::DerivedUpdates;
use speech_practice::store::RecordingStore;
use uuid::Uuid;

async fn setup_store() -> (RecordingStore, tempfile::TempDir) {
    let (pool, guard) = db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    db::init_database_schema(&pool).await.unwrap();
    db::ensure_schema_version(&pool).await.unwrap();
    (RecordingStore::new(pool), guard)
}

async fn insert_recording(store: &RecordingStore, user: &str, session: Uuid) -> Uuid {
    store
        .insert_recording(user, session, 0, 0.0, 5.0, AudioFormat::Wav, 4096)
        .await
        .unwrap()
        .id
}

fn analysis(score: i64) -> AnalysisResult {
    AnalysisResult {
        overall_score: score,
        scores: FactorScores {
            pronunciation: score,
            fluency: score,
            timing: score,
            clarity: score,
        },
        issues: Vec::new(),
        transcription: None,
        recommendations: Vec::new(),
        processed_at: Utc::now(),
    }
}

#[tokio::test]
async fn schema_version_check_accepts_fresh_and_stamped_databases() {
    let (pool, _guard) = db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    db::init_database_schema(&pool).await.unwrap();
    // Stamps on first call, verifies on the second
    db::ensure_schema_version(&pool).await.unwrap();
    db::ensure_schema_version(&pool).await.unwrap();
}

#[tokio::test]
async fn insert_then_get_round_trips() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;

    let recording = store.get(id).await.unwrap().unwrap();
    assert_eq!(recording.user_id, "alice");
    assert_eq!(recording.session_id, session);
    assert_eq!(recording.format, AudioFormat::Wav);
    assert_eq!(recording.file_size, 4096);
    assert_eq!(recording.status, RecordingStatus::Uploading);
    assert!(recording.waveform_data.is_none());
    assert!(recording.processed_at.is_none());
}

#[tokio::test]
async fn session_owner_lookup() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();

    assert_eq!(
        store.session_owner(session).await.unwrap().as_deref(),
        Some("alice")
    );
    assert_eq!(store.session_owner(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn get_owned_hides_other_users_recordings() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;

    assert!(store.get_owned("alice", id).await.is_ok());
    assert!(store.get_owned("mallory", id).await.is_err());
}

#[tokio::test]
async fn completion_persists_all_derived_fields_at_once() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;
    store.mark_stored(id, "file:///tmp/a.wav").await.unwrap();

    let updates = DerivedUpdates {
        audio_url: None,
        format: None,
        duration_secs: Some(4.8),
        waveform_json: Some("[0.0,0.5,-0.5]".to_string()),
        transcription: Some("hello world".to_string()),
        transcription_confidence: Some(0.93),
    };
    assert!(store.apply_completion(id, &updates).await.unwrap());

    let recording = store.get(id).await.unwrap().unwrap();
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.duration_secs, Some(4.8));
    assert_eq!(recording.waveform_data, Some(vec![0.0, 0.5, -0.5]));
    assert_eq!(recording.transcription.as_deref(), Some("hello world"));
    assert_eq!(recording.transcription_confidence, Some(0.93));
    assert!(recording.processed_at.is_some());
    assert!(recording.error.is_none());
}

#[tokio::test]
async fn completion_is_discarded_when_recording_left_processing() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;
    store.mark_stored(id, "file:///tmp/a.wav").await.unwrap();

    // Deleted while the job was running
    assert!(store.delete(id).await.unwrap());

    let updates = DerivedUpdates {
        waveform_json: Some("[1.0]".to_string()),
        ..Default::default()
    };
    assert!(!store.apply_completion(id, &updates).await.unwrap());
}

#[tokio::test]
async fn completion_requires_processing_status() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    // Still Uploading, never marked stored
    let id = insert_recording(&store, "alice", session).await;

    let updates = DerivedUpdates::default();
    assert!(!store.apply_completion(id, &updates).await.unwrap());
}

#[tokio::test]
async fn failed_recording_exposes_its_error() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;
    store.mark_stored(id, "file:///tmp/a.wav").await.unwrap();

    store.mark_failed(id, "Processing failed: corrupt audio").await.unwrap();

    let recording = store.get(id).await.unwrap().unwrap();
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(
        recording.error.as_deref(),
        Some("Processing failed: corrupt audio")
    );
}

#[tokio::test]
async fn reprocessing_clears_prior_artifacts() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;
    store.mark_stored(id, "file:///tmp/a.wav").await.unwrap();

    let updates = DerivedUpdates {
        waveform_json: Some("[0.1]".to_string()),
        transcription: Some("old words".to_string()),
        transcription_confidence: Some(0.5),
        ..Default::default()
    };
    assert!(store.apply_completion(id, &updates).await.unwrap());
    store.update_analysis(id, &analysis(88)).await.unwrap();

    assert!(store.mark_reprocessing(id).await.unwrap());

    let recording = store.get(id).await.unwrap().unwrap();
    assert_eq!(recording.status, RecordingStatus::Processing);
    assert!(recording.waveform_data.is_none());
    assert!(recording.transcription.is_none());
    assert!(recording.transcription_confidence.is_none());
    assert!(recording.quality_score.is_none());
    assert!(recording.analysis_result.is_none());
    assert!(recording.processed_at.is_none());
    assert!(recording.error.is_none());
}

#[tokio::test]
async fn update_analysis_round_trips() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;

    store.update_analysis(id, &analysis(91)).await.unwrap();

    let recording = store.get(id).await.unwrap().unwrap();
    assert_eq!(recording.quality_score, Some(91));
    let stored = recording.analysis_result.unwrap();
    assert_eq!(stored.overall_score, 91);
    assert_eq!(stored.scores.pronunciation, 91);
}

#[tokio::test]
async fn usage_aggregates_count_only_the_given_user() {
    let (store, _guard) = setup_store().await;
    let alice_session = store.create_session("alice").await.unwrap();
    let bob_session = store.create_session("bob").await.unwrap();

    for _ in 0..3 {
        insert_recording(&store, "alice", alice_session).await;
    }
    insert_recording(&store, "bob", bob_session).await;

    assert_eq!(store.daily_count("alice").await.unwrap(), 3);
    assert_eq!(store.daily_count("bob").await.unwrap(), 1);
    assert_eq!(store.daily_count("carol").await.unwrap(), 0);

    assert_eq!(store.storage_bytes("alice").await.unwrap(), 3 * 4096);
    assert_eq!(store.storage_bytes("carol").await.unwrap(), 0);
}

#[tokio::test]
async fn list_by_session_orders_by_sentence_index() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();

    for index in [2i64, 0, 1] {
        store
            .insert_recording("alice", session, index, 0.0, 5.0, AudioFormat::Mp3, 100)
            .await
            .unwrap();
    }

    let recordings = store.list_by_session(session).await.unwrap();
    let indexes: Vec<i64> = recordings.iter().map(|r| r.sentence_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (store, _guard) = setup_store().await;
    let session = store.create_session("alice").await.unwrap();
    let id = insert_recording(&store, "alice", session).await;

    assert!(store.delete(id).await.unwrap());
    assert!(!store.delete(id).await.unwrap());
    assert!(store.get(id).await.unwrap().is_none());
}
