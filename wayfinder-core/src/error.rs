use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use wayfinder_driver::DriverError;

#[derive(Error, Debug)]
pub enum ExploreError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Timeout {ms}ms exceeded: {operation}")]
    Timeout { operation: String, ms: u64 },

    #[error("Run blocked: {0}")]
    Blocked(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Decision failed: {0}")]
    Decision(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ExploreError>;

/// How a failure affects the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// The browser can no longer be trusted; abort the whole run.
    Blocking,
    /// Abandon the current step or unit and keep going.
    Skippable,
    /// A selector hit several elements; retry against the first match.
    AmbiguousSelector { selector: String, count: usize },
}

const BLOCKING_MARKERS: &[&str] = &[
    "crashed",
    "disconnected",
    "target closed",
    "session closed",
    "browser has been closed",
    "browser closed",
    "connection closed",
];

static AMBIGUOUS_SELECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Selector "(?P<selector>.+?)" matched (?P<count>\d+) elements"#)
        .expect("ambiguous selector pattern is valid")
});

/// Quoted selectors and URLs embedded in a message; never read for markers.
static EMBEDDED_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[^"]*"|\b[a-zA-Z][a-zA-Z0-9+.-]*://\S*"#)
        .expect("embedded target pattern is valid")
});

/// Classifies an error message in the default (non-strict) mode.
pub fn classify(message: &str) -> ErrorClass {
    classify_with_mode(message, false)
}

/// Classifies a free-form error message. Strict mode promotes every
/// non-recoverable error to blocking; ambiguous selectors are still retried
/// first.
pub fn classify_with_mode(message: &str, strict: bool) -> ErrorClass {
    if let Some(caps) = AMBIGUOUS_SELECTOR.captures(message) {
        let count = caps["count"].parse().unwrap_or(0);
        if count > 1 {
            return ErrorClass::AmbiguousSelector {
                selector: caps["selector"].to_string(),
                count,
            };
        }
    }

    let lowered = EMBEDDED_TARGET.replace_all(message, "").to_lowercase();
    if strict || BLOCKING_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorClass::Blocking
    } else {
        ErrorClass::Skippable
    }
}

fn skippable_unless(strict: bool) -> ErrorClass {
    if strict {
        ErrorClass::Blocking
    } else {
        ErrorClass::Skippable
    }
}

/// Classifies a driver error by its kind. Only variants carrying free-form
/// browser text fall back to the message markers.
pub fn classify_driver(error: &DriverError, strict: bool) -> ErrorClass {
    match error {
        DriverError::Closed(_) => ErrorClass::Blocking,
        DriverError::AmbiguousSelector { selector, count } if *count > 1 => {
            ErrorClass::AmbiguousSelector {
                selector: selector.clone(),
                count: *count,
            }
        }
        DriverError::AmbiguousSelector { .. }
        | DriverError::ElementNotFound(_)
        | DriverError::InvalidSelector(_)
        | DriverError::InvalidUrl(_)
        | DriverError::Timeout { .. }
        | DriverError::Unsupported(_)
        | DriverError::Decider(_)
        | DriverError::Parse(_) => skippable_unless(strict),
        DriverError::Http(_) | DriverError::Navigation(_) | DriverError::Other(_) => {
            classify_with_mode(&error.to_string(), strict)
        }
    }
}

impl ExploreError {
    pub fn class(&self, strict: bool) -> ErrorClass {
        match self {
            ExploreError::Blocked(_) => ErrorClass::Blocking,
            ExploreError::Config(_) | ExploreError::Join(_) => ErrorClass::Blocking,
            ExploreError::Driver(e) => classify_driver(e, strict),
            ExploreError::Timeout { .. } => skippable_unless(strict),
            other => classify_with_mode(&other.to_string(), strict),
        }
    }

    pub fn is_blocking(&self, strict: bool) -> bool {
        self.class(strict) == ErrorClass::Blocking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_closed_is_blocking() {
        assert_eq!(classify("Target closed: page crashed"), ErrorClass::Blocking);
        assert_eq!(classify("Browser has been closed"), ErrorClass::Blocking);
        assert_eq!(classify("websocket disconnected"), ErrorClass::Blocking);
    }

    #[test]
    fn test_timeout_is_skippable() {
        assert_eq!(
            classify("Timeout 30000ms exceeded: waiting for selector"),
            ErrorClass::Skippable
        );
        assert_eq!(classify("Element not found"), ErrorClass::Skippable);
    }

    #[test]
    fn test_ambiguous_selector_is_parsed() {
        assert_eq!(
            classify("Selector \"button.submit\" matched 3 elements"),
            ErrorClass::AmbiguousSelector {
                selector: "button.submit".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_strict_mode_promotes_skippable() {
        assert_eq!(
            classify_with_mode("Timeout 30000ms exceeded", true),
            ErrorClass::Blocking
        );
        assert!(matches!(
            classify_with_mode("Selector \"a\" matched 2 elements", true),
            ErrorClass::AmbiguousSelector { .. }
        ));
    }

    #[test]
    fn test_markers_ignore_selector_and_url_text() {
        let err = ExploreError::from(DriverError::ElementNotFound(
            "#modal.closed button.crashed".to_string(),
        ));
        assert_eq!(err.class(false), ErrorClass::Skippable);

        let err = ExploreError::from(DriverError::Navigation(
            "404 for https://crashed.example.com/closed".to_string(),
        ));
        assert_eq!(err.class(false), ErrorClass::Skippable);

        assert_eq!(
            classify(r#"Other error: click on "a.browser-closed" failed"#),
            ErrorClass::Skippable
        );
        assert_eq!(
            classify("Other error: browser has been closed"),
            ErrorClass::Blocking
        );
    }

    #[test]
    fn test_driver_error_classification_uses_kind() {
        let err = ExploreError::from(DriverError::Closed("session gone".to_string()));
        assert!(err.is_blocking(false));

        let err = ExploreError::Timeout {
            operation: "click".to_string(),
            ms: 30000,
        };
        assert!(!err.is_blocking(false));
        assert!(err.is_blocking(true));
    }
}
