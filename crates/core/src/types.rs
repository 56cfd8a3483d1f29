/// Case identifiers are opaque strings assigned by the backend.
pub type CaseId = String;

/// Guild identifiers are Discord snowflakes carried as strings.
pub type GuildId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
