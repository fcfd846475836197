use thiserror::Error;

/// Errors that escape the decision layer.
///
/// Recoverable conditions (missing tables, thin samples, bad numeric fields)
/// are handled where they occur and never reach this enum.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("store query failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("checkpoint serialization failed: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("configuration load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// True when the error is Postgres "undefined_table" (SQLSTATE 42P01).
///
/// Queries against tables the store has not migrated yet are treated as
/// empty results, not failures.
pub fn is_undefined_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_is_not_undefined_table() {
        assert!(!is_undefined_table(&sqlx::Error::RowNotFound));
    }
}
