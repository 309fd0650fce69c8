//! Values to type into form fields.
//!
//! Keyword-matched defaults always work; a decider can optionally be asked
//! for something more plausible, falling back to the default on any error.

use crate::action::{ElementInfo, keyword_matcher};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;
use wayfinder_driver::{Decider, DeciderRequest};

const INPUT_SYSTEM_PROMPT: &str = "You fill in web forms for an automated UI tester. \
Given a form field description, reply with JSON {\"value\": \"...\"} containing one \
realistic, harmless test value for that field.";

/// Keyword groups matched against the field's type and labels, in order.
const KEYWORD_DEFAULTS: &[(&[&str], &str)] = &[
    (&["email", "e-mail"], "test@example.com"),
    (&["password", "passwd", "pwd"], "Test1234!"),
    (&["message", "comment", "description", "note"], "This is a test message."),
    (&["phone", "tel", "mobile"], "+15555550123"),
    (&["url", "website", "homepage"], "https://example.com"),
    (&["zip", "postal", "postcode"], "10001"),
    (&["date", "birthday", "dob"], "2024-01-15"),
    (
        &["number", "age", "quantity", "qty", "amount", "count"],
        "42",
    ),
    (&["search", "query", "keyword"], "test"),
    (&["first name", "firstname", "first_name"], "Test"),
    (&["last name", "lastname", "last_name", "surname"], "User"),
    (&["name", "username", "user"], "Test User"),
    (&["company", "organization", "organisation"], "Example Inc"),
    (&["city"], "Springfield"),
    (&["address", "street"], "1 Main Street"),
];

static KEYWORD_MATCHERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    KEYWORD_DEFAULTS
        .iter()
        .map(|(keywords, value)| (keyword_matcher(keywords), *value))
        .collect()
});

const FALLBACK_VALUE: &str = "test input";

#[derive(Clone, Default)]
pub struct InputValueResolver {
    decider: Option<Arc<dyn Decider>>,
    timeout: Duration,
}

impl InputValueResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decider(decider: Arc<dyn Decider>, timeout: Duration) -> Self {
        Self {
            decider: Some(decider),
            timeout,
        }
    }

    /// Zero-cost value for a field, chosen by input type then by labels.
    pub fn default_value(element: &ElementInfo) -> String {
        if element.tag == "select"
            && let Some(option) = element.options.iter().find(|o| !o.trim().is_empty())
        {
            return option.clone();
        }

        let input_type = element.input_type.as_deref().unwrap_or("").to_lowercase();
        let labels = element.label_text();

        for (keywords, value) in KEYWORD_DEFAULTS {
            if keywords.contains(&input_type.as_str()) {
                return value.to_string();
            }
        }
        for (matcher, value) in KEYWORD_MATCHERS.iter() {
            if matcher.is_match(&labels) {
                return value.to_string();
            }
        }
        FALLBACK_VALUE.to_string()
    }

    /// Asks the decider when one is configured; otherwise, or on any
    /// failure, returns [`Self::default_value`].
    pub async fn resolve(&self, element: &ElementInfo, page_summary: &str) -> String {
        let fallback = Self::default_value(element);
        let Some(decider) = &self.decider else {
            return fallback;
        };

        let request = DeciderRequest {
            system: INPUT_SYSTEM_PROMPT.to_string(),
            user: format!(
                "Field: tag={} type={} name={} label={} placeholder={}\nOptions: {}\nPage:\n{}",
                element.tag,
                element.input_type.as_deref().unwrap_or("text"),
                element.name.as_deref().unwrap_or(""),
                element.aria_label.as_deref().unwrap_or(&element.text),
                element.placeholder.as_deref().unwrap_or(""),
                element.options.join(", "),
                page_summary
            ),
            timeout: self.timeout,
        };

        match tokio::time::timeout(self.timeout, decider.decide(request)).await {
            Ok(Ok(reply)) => match reply["value"].as_str().map(str::trim) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => {
                    debug!("Decider gave no usable input value, using default");
                    fallback
                }
            },
            Ok(Err(e)) => {
                debug!("Input value decider failed: {}", e);
                fallback
            }
            Err(_) => {
                debug!("Input value decider timed out");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(input_type: Option<&str>, name: Option<&str>) -> ElementInfo {
        ElementInfo {
            tag: "input".to_string(),
            input_type: input_type.map(str::to_string),
            name: name.map(str::to_string),
            ..ElementInfo::default()
        }
    }

    #[test]
    fn test_type_beats_labels() {
        let element = field(Some("email"), Some("username"));
        assert_eq!(InputValueResolver::default_value(&element), "test@example.com");
    }

    #[test]
    fn test_labels_match_keywords() {
        assert_eq!(
            InputValueResolver::default_value(&field(Some("text"), Some("user_phone"))),
            "+15555550123"
        );
        assert_eq!(
            InputValueResolver::default_value(&field(None, Some("q_search"))),
            "test"
        );
        assert_eq!(
            InputValueResolver::default_value(&field(None, Some("zzz"))),
            FALLBACK_VALUE
        );
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert_eq!(
            InputValueResolver::default_value(&field(None, Some("country"))),
            FALLBACK_VALUE
        );
        assert_eq!(
            InputValueResolver::default_value(&field(None, Some("hotel"))),
            FALLBACK_VALUE
        );
        assert_eq!(
            InputValueResolver::default_value(&field(None, Some("item-count"))),
            "42"
        );
    }

    #[test]
    fn test_select_uses_first_real_option() {
        let element = ElementInfo {
            tag: "select".to_string(),
            options: vec!["".to_string(), "blue".to_string()],
            ..ElementInfo::default()
        };
        assert_eq!(InputValueResolver::default_value(&element), "blue");
    }

    #[tokio::test]
    async fn test_resolve_without_decider_uses_default() {
        let resolver = InputValueResolver::new();
        let value = resolver.resolve(&field(Some("password"), None), "").await;
        assert_eq!(value, "Test1234!");
    }
}
