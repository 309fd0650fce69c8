//! Coverage accounting.
//!
//! Every key is normalized before insertion so cosmetic differences (case,
//! trailing slashes, line numbers in stack traces) do not inflate coverage.

use crate::action::ActionKind;
use crate::fingerprint::PageObservation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use url::Url;

const CONSOLE_ERROR_MAX_CHARS: usize = 200;

static LINE_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\d+(:\d+)?").expect("line/column pattern is valid"));
static LINE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\s*(at\s+)?line\s+\d+(\s*,?\s*col(umn)?\s+\d+)?\s*\)?")
        .expect("line word pattern is valid")
});

// Points per item and the cap for each dimension of the composite score
const URL_POINTS: f64 = 2.0;
const URL_CAP: f64 = 40.0;
const DIALOG_POINTS: f64 = 3.0;
const DIALOG_CAP: f64 = 15.0;
const FORM_POINTS: f64 = 4.0;
const FORM_CAP: f64 = 20.0;
const INTERACTION_POINTS: f64 = 1.0;
const INTERACTION_CAP: f64 = 25.0;

/// Immutable copy of the coverage sets at a given step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub step_index: usize,
    pub urls: BTreeSet<String>,
    pub dialogs: BTreeSet<String>,
    pub forms: BTreeSet<String>,
    pub network_requests: BTreeSet<String>,
    pub console_errors: BTreeSet<String>,
    pub interactions: BTreeSet<String>,
}

/// New items observed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageGain {
    pub new_urls: Vec<String>,
    pub new_dialogs: Vec<String>,
    pub new_forms: Vec<String>,
    pub new_network_requests: Vec<String>,
    pub new_console_errors: Vec<String>,
    pub new_interactions: Vec<String>,
    pub total_gain: usize,
    pub has_gain: bool,
}

impl CoverageSnapshot {
    /// Set difference `self - previous`. Pure; neither snapshot changes.
    pub fn gain_since(&self, previous: &CoverageSnapshot) -> CoverageGain {
        fn diff(current: &BTreeSet<String>, previous: &BTreeSet<String>) -> Vec<String> {
            current.difference(previous).cloned().collect()
        }

        let new_urls = diff(&self.urls, &previous.urls);
        let new_dialogs = diff(&self.dialogs, &previous.dialogs);
        let new_forms = diff(&self.forms, &previous.forms);
        let new_network_requests = diff(&self.network_requests, &previous.network_requests);
        let new_console_errors = diff(&self.console_errors, &previous.console_errors);
        let new_interactions = diff(&self.interactions, &previous.interactions);

        let total_gain = new_urls.len()
            + new_dialogs.len()
            + new_forms.len()
            + new_network_requests.len()
            + new_console_errors.len()
            + new_interactions.len();

        CoverageGain {
            new_urls,
            new_dialogs,
            new_forms,
            new_network_requests,
            new_console_errors,
            new_interactions,
            total_gain,
            has_gain: total_gain > 0,
        }
    }
}

/// Result of performing one action, for per-kind effectiveness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub gain: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct KindStats {
    uses: usize,
    total_gain: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub unique_urls: usize,
    pub dialogs: usize,
    pub forms: usize,
    pub network_requests: usize,
    pub console_errors: usize,
    pub interactions: usize,
    pub urls_with_forms: usize,
    pub urls_with_errors: usize,
    /// Composite 0-100 score.
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct CoverageTracker {
    urls: BTreeSet<String>,
    dialogs: BTreeSet<String>,
    forms: BTreeSet<String>,
    network_requests: BTreeSet<String>,
    console_errors: BTreeSet<String>,
    interactions: BTreeSet<String>,
    urls_with_forms: BTreeSet<String>,
    urls_with_errors: BTreeSet<String>,
    kind_stats: HashMap<ActionKind, KindStats>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_url(&mut self, url: &str) -> bool {
        let key = normalize_url(url);
        if key.is_empty() {
            return false;
        }
        self.urls.insert(key)
    }

    pub fn record_dialog(&mut self, dialog: &str) -> bool {
        let key = dialog.trim().to_lowercase();
        !key.is_empty() && self.dialogs.insert(key)
    }

    /// Records a form by key; `url` is the page it appeared on.
    pub fn record_form(&mut self, url: &str, form: &str) -> bool {
        let key = form.trim().to_lowercase();
        if key.is_empty() {
            return false;
        }
        self.urls_with_forms.insert(normalize_url(url));
        self.forms.insert(key)
    }

    pub fn record_network_request(&mut self, request: &str) -> bool {
        let key = normalize_request(request);
        !key.is_empty() && self.network_requests.insert(key)
    }

    pub fn record_console_error(&mut self, url: &str, message: &str) -> bool {
        let key = normalize_console_error(message);
        if key.is_empty() {
            return false;
        }
        self.urls_with_errors.insert(normalize_url(url));
        self.console_errors.insert(key)
    }

    pub fn record_element_interaction(&mut self, selector: &str) -> bool {
        let key = selector.trim().to_string();
        !key.is_empty() && self.interactions.insert(key)
    }

    pub fn has_interacted(&self, selector: &str) -> bool {
        self.interactions.contains(selector.trim())
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.urls.contains(&normalize_url(url))
    }

    pub fn visited_urls(&self) -> &BTreeSet<String> {
        &self.urls
    }

    pub fn interacted_elements(&self) -> &BTreeSet<String> {
        &self.interactions
    }

    /// Records every facet of an observation; returns how many items were new.
    pub fn record_observation(&mut self, observation: &PageObservation) -> usize {
        let mut new_items = usize::from(self.record_url(&observation.url));
        for dialog in &observation.dialogs {
            new_items += usize::from(self.record_dialog(dialog));
        }
        for form in &observation.forms {
            new_items += usize::from(self.record_form(&observation.url, form));
        }
        for request in &observation.network_requests {
            new_items += usize::from(self.record_network_request(request));
        }
        for error in &observation.console_errors {
            new_items += usize::from(self.record_console_error(&observation.url, error));
        }
        new_items
    }

    pub fn take_snapshot(&self, step_index: usize) -> CoverageSnapshot {
        CoverageSnapshot {
            step_index,
            urls: self.urls.clone(),
            dialogs: self.dialogs.clone(),
            forms: self.forms.clone(),
            network_requests: self.network_requests.clone(),
            console_errors: self.console_errors.clone(),
            interactions: self.interactions.clone(),
        }
    }

    pub fn calculate_gain(&self, previous: &CoverageSnapshot) -> CoverageGain {
        self.take_snapshot(previous.step_index).gain_since(previous)
    }

    pub fn record_action_outcome(&mut self, outcome: ActionOutcome) {
        let stats = self.kind_stats.entry(outcome.kind).or_default();
        stats.uses += 1;
        stats.total_gain += outcome.gain;
    }

    /// Action kinds ranked by mean coverage gain per use, best first.
    pub fn most_effective_action_types(&self) -> Vec<(ActionKind, f64)> {
        let mut ranked: Vec<(ActionKind, f64)> = self
            .kind_stats
            .iter()
            .filter(|(_, s)| s.uses > 0)
            .map(|(kind, s)| (*kind, s.total_gain as f64 / s.uses as f64))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    pub fn get_stats(&self) -> CoverageStats {
        let dimension = |count: usize, points: f64, cap: f64| (count as f64 * points).min(cap);
        let score = dimension(self.urls.len(), URL_POINTS, URL_CAP)
            + dimension(self.dialogs.len(), DIALOG_POINTS, DIALOG_CAP)
            + dimension(self.forms.len(), FORM_POINTS, FORM_CAP)
            + dimension(self.interactions.len(), INTERACTION_POINTS, INTERACTION_CAP);

        CoverageStats {
            unique_urls: self.urls.len(),
            dialogs: self.dialogs.len(),
            forms: self.forms.len(),
            network_requests: self.network_requests.len(),
            console_errors: self.console_errors.len(),
            interactions: self.interactions.len(),
            urls_with_forms: self.urls_with_forms.len(),
            urls_with_errors: self.urls_with_errors.len(),
            score,
        }
    }
}

/// Lowercased URL without fragment or trailing slash.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.split('#').next().unwrap_or("").to_string(),
    };
    without_fragment
        .trim_end_matches('/')
        .to_lowercase()
}

/// Host and path of a request URL; query strings are cache-busters more
/// often than not.
pub fn normalize_request(request: &str) -> String {
    match Url::parse(request.trim()) {
        Ok(parsed) => format!(
            "{}{}",
            parsed.host_str().unwrap_or(""),
            parsed.path().trim_end_matches('/')
        )
        .to_lowercase(),
        Err(_) => request.trim().to_lowercase(),
    }
}

/// Console message stripped of line/column numbers and truncated.
pub fn normalize_console_error(message: &str) -> String {
    let without_words = LINE_WORD.replace_all(message, " ");
    let without_positions = LINE_COLUMN.replace_all(&without_words, "");
    let collapsed = without_positions
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.chars().take(CONSOLE_ERROR_MAX_CHARS).collect()
}
