use thiserror::Error;

/// Place survey error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurveyError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("The founding visit of a place cannot be deleted")]
    ProtectedVisit,

    #[error("Visit not found at index {0}")]
    VisitNotFound(usize),

    #[error("Place not found: {0}")]
    PlaceNotFound(String),

    #[error("Image not found at index {0}")]
    ImageNotFound(usize),

    #[error("Place name must not be empty")]
    EmptyName,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for survey operations
pub type SResult<T> = Result<T, SurveyError>;

impl From<std::io::Error> for SurveyError {
    fn from(err: std::io::Error) -> Self {
        SurveyError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SurveyError {
    fn from(err: serde_json::Error) -> Self {
        SurveyError::Storage(err.to_string())
    }
}
