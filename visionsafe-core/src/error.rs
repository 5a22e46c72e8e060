use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid worker id: {0}")]
    InvalidWorkerId(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidWorkerId("Worker-x".to_string());
        assert_eq!(err.to_string(), "Invalid worker id: Worker-x");
    }
}
