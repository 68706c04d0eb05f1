#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Data Error: {0}")]
    Data(String),

    #[error("Shape Error: {0} should be {1}, but got {2}")]
    Shape(String, String, String),

    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),
}
