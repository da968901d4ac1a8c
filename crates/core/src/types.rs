/// Jobs are identified by random UUIDs; the same value keys the job channel.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Caller-supplied solver parameters, passed through to the entry point untyped.
pub type Parameters = serde_json::Map<String, serde_json::Value>;
