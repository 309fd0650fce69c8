use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of interaction an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Select,
    Hover,
    Press,
    Navigate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Select => "select",
            ActionKind::Hover => "hover",
            ActionKind::Press => "press",
            ActionKind::Navigate => "navigate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete action against the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { selector: String },
    Fill { selector: String, value: String },
    Select { selector: String, value: String },
    Hover { selector: String },
    Press { selector: String, key: String },
    Navigate { url: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Fill { .. } => ActionKind::Fill,
            Action::Select { .. } => ActionKind::Select,
            Action::Hover { .. } => ActionKind::Hover,
            Action::Press { .. } => ActionKind::Press,
            Action::Navigate { .. } => ActionKind::Navigate,
        }
    }

    /// The selector the action targets; for navigation, the URL.
    pub fn target(&self) -> &str {
        match self {
            Action::Click { selector }
            | Action::Fill { selector, .. }
            | Action::Select { selector, .. }
            | Action::Hover { selector }
            | Action::Press { selector, .. } => selector,
            Action::Navigate { url } => url,
        }
    }

    /// Same action aimed at a different selector.
    pub fn with_selector(&self, new_selector: &str) -> Action {
        let selector = new_selector.to_string();
        match self {
            Action::Click { .. } => Action::Click { selector },
            Action::Fill { value, .. } => Action::Fill {
                selector,
                value: value.clone(),
            },
            Action::Select { value, .. } => Action::Select {
                selector,
                value: value.clone(),
            },
            Action::Hover { .. } => Action::Hover { selector },
            Action::Press { key, .. } => Action::Press {
                selector,
                key: key.clone(),
            },
            Action::Navigate { url } => Action::Navigate { url: url.clone() },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Action::Fill { selector, value } => format!("fill {} = {:?}", selector, value),
            Action::Select { selector, value } => format!("select {} = {:?}", selector, value),
            Action::Press { selector, key } => format!("press {} on {}", key, selector),
            other => format!("{} {}", other.kind(), other.target()),
        }
    }
}

/// Raw metadata about the element a candidate targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    pub text: String,
    pub role: Option<String>,
    pub href: Option<String>,
    pub input_type: Option<String>,
    pub name: Option<String>,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub disabled: bool,
    pub required: bool,
    pub in_form: bool,
    pub in_nav: bool,
    pub is_submit: bool,
    pub expandable: bool,
    /// Part of a form whose submit control is currently disabled.
    pub enables_disabled_submit: bool,
    /// A required field in the same form is still empty.
    pub required_sibling_unfilled: bool,
    pub options: Vec<String>,
}

/// Matches any of `keywords` as whole words of a lowercased label. Anything
/// outside `a-z0-9` separates words, so `user_email` contains `email` but
/// `country` does not contain `count`.
pub fn keyword_matcher(keywords: &[&str]) -> Regex {
    let alternatives = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?:^|[^a-z0-9])(?:{})(?:$|[^a-z0-9])", alternatives))
        .expect("escaped keywords form a valid pattern")
}

impl ElementInfo {
    /// All human-facing labels, lowercased, for keyword matching.
    pub fn label_text(&self) -> String {
        [
            Some(self.text.as_str()),
            self.aria_label.as_deref(),
            self.placeholder.as_deref(),
            self.name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }

    pub fn is_button_like(&self) -> bool {
        self.tag == "button"
            || self.role.as_deref() == Some("button")
            || (self.tag == "input"
                && matches!(
                    self.input_type.as_deref(),
                    Some("submit") | Some("button") | Some("image")
                ))
    }

    pub fn is_form_field(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "select" | "textarea") && !self.is_button_like()
    }
}

/// Per-dimension scores, each 0-10.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub novelty: f64,
    pub business_criticality: f64,
    pub risk: f64,
    pub branch_factor: f64,
}

/// An action the explorer could take from the current page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub selector: String,
    pub kind: ActionKind,
    pub element: ElementInfo,
    pub breakdown: ScoreBreakdown,
    pub priority_score: f64,
}

impl ActionCandidate {
    pub fn new(selector: impl Into<String>, kind: ActionKind, element: ElementInfo) -> Self {
        Self {
            selector: selector.into(),
            kind,
            element,
            breakdown: ScoreBreakdown::default(),
            priority_score: 0.0,
        }
    }

    /// Identity of the candidate within a page: kind plus selector.
    pub fn key(&self) -> String {
        edge_key(self.kind, &self.selector)
    }

    /// Builds the concrete action, using `value` for fill and select.
    pub fn to_action(&self, value: Option<&str>) -> Action {
        let selector = self.selector.clone();
        match self.kind {
            ActionKind::Click => Action::Click { selector },
            ActionKind::Fill => Action::Fill {
                selector,
                value: value.unwrap_or_default().to_string(),
            },
            ActionKind::Select => Action::Select {
                selector,
                value: value
                    .map(str::to_string)
                    .or_else(|| self.element.options.first().cloned())
                    .unwrap_or_default(),
            },
            ActionKind::Hover => Action::Hover { selector },
            ActionKind::Press => Action::Press {
                selector,
                key: value.unwrap_or("Enter").to_string(),
            },
            ActionKind::Navigate => Action::Navigate {
                url: self.element.href.clone().unwrap_or(selector),
            },
        }
    }
}

pub fn edge_key(kind: ActionKind, selector: &str) -> String {
    format!("{}::{}", kind.as_str(), selector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_selector_keeps_payload() {
        let action = Action::Fill {
            selector: "input.a".to_string(),
            value: "x".to_string(),
        };
        assert_eq!(
            action.with_selector("input.a >> nth=0"),
            Action::Fill {
                selector: "input.a >> nth=0".to_string(),
                value: "x".to_string()
            }
        );
    }

    #[test]
    fn test_candidate_key_combines_kind_and_selector() {
        let candidate = ActionCandidate::new("#go", ActionKind::Click, ElementInfo::default());
        assert_eq!(candidate.key(), "click::#go");
    }

    #[test]
    fn test_select_defaults_to_first_option() {
        let element = ElementInfo {
            tag: "select".to_string(),
            options: vec!["red".to_string(), "blue".to_string()],
            ..ElementInfo::default()
        };
        let candidate = ActionCandidate::new("#color", ActionKind::Select, element);
        assert_eq!(
            candidate.to_action(None),
            Action::Select {
                selector: "#color".to_string(),
                value: "red".to_string()
            }
        );
    }
}
