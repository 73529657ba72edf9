use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Sessions table - practice sessions that recordings belong to
#[derive(Iden)]
pub enum Sessions {
    Table,
    Id,
    UserId,
    CreatedAt,
}

/// Recordings table - one row per user utterance
#[derive(Iden)]
pub enum Recordings {
    Table,
    Id,
    UserId,
    SessionId,
    SentenceIndex,
    SentenceStartTime,
    SentenceEndTime,
    AudioUrl,
    Format,
    DurationSecs,
    FileSize,
    WaveformJson,
    Transcription,
    TranscriptionConfidence,
    QualityScore,
    AnalysisJson,
    Status,
    Error,
    CreatedAt,
    ProcessedAt,
}
