use thiserror::Error;

/// Errors raised by browser and decider collaborators.
///
/// The rendered messages are the only channel the core uses to classify a
/// failure as blocking or skippable, so the wording of the variants below is
/// part of the contract.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timeout {ms}ms exceeded: {operation}")]
    Timeout { operation: String, ms: u64 },

    #[error("Element not found: no element matches selector \"{0}\"")]
    ElementNotFound(String),

    #[error("Selector \"{selector}\" matched {count} elements")]
    AmbiguousSelector { selector: String, count: usize },

    #[error("Invalid selector \"{0}\"")]
    InvalidSelector(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Target closed: {0}")]
    Closed(String),

    #[error("Decider error: {0}")]
    Decider(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
