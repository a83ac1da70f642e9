use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decimal error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: &'static str },

    #[error("Invalid threshold list {thresholds:?}: {reason}")]
    InvalidThresholds { thresholds: Vec<String>, reason: &'static str },

    #[error("Invalid year-month '{0}', expected YYYY-MM")]
    InvalidYearMonth(String),

    #[error("Invalid category tag '{0}'")]
    InvalidCategory(String),

    #[error("Budget for user {user_id} in {year_month} already exists")]
    DuplicateBudget { user_id: i64, year_month: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
