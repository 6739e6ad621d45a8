pub mod analytics;
pub mod db;
pub mod demo;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod repo;
pub mod rules;
pub mod usage;
pub mod validate;
pub mod workspace;

#[cfg(test)]
mod tests {
    use super::error::AppError;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("DB_TEST", "db failed").with_retryable(false);
        assert_eq!(err.code, "DB_TEST");
        assert_eq!(err.message, "db failed");
        assert_eq!(err.retryable, false);
    }
}
