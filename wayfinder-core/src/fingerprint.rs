//! State fingerprinting.
//!
//! A page is reduced to independent facets (URL, DOM shape, visible text,
//! form state, dialogs, auth markers), each hashed on its own so the cause
//! of a state change can be inspected. Only URL, DOM, form and dialog hashes
//! feed the combined identity key; visible text and auth are diagnostic.

use crate::config::FingerprintConfig;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use tracing::debug;
use url::Url;
use wayfinder_driver::Browser;

const COOKIE_SCRIPT: &str = "document.cookie";
const NETWORK_SCRIPT: &str = "performance.getEntriesByType('resource').map(e => e.name)";
const CONSOLE_SCRIPT: &str = "window.__wayfinderConsoleErrors || []";

/// Tags that never contribute to structure or text.
const IGNORED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "link", "meta", "head", "time",
];

/// Class or id segments that mark a subtree as transient.
const TRANSIENT_WORDS: &[&str] = &[
    "loading",
    "loader",
    "spinner",
    "skeleton",
    "shimmer",
    "toast",
    "snackbar",
    "notification",
    "timestamp",
    "timeago",
    "clock",
    "avatar",
    "ad",
    "ads",
    "advert",
    "advertisement",
    "sponsored",
    "animate",
    "animated",
    "animating",
    "marquee",
    "carousel",
];

const TRANSIENT_ROLES: &[&str] = &["alert", "status", "progressbar", "marquee", "timer"];

const AUTH_COOKIE_HINTS: &[&str] = &["session", "auth", "token", "jwt", "sid", "login"];

/// Everything observed about a page at one moment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageObservation {
    pub url: String,
    pub title: String,
    pub dom_structure: String,
    pub visible_text: String,
    pub form_state: String,
    pub dialog_state: String,
    pub auth_markers: Vec<String>,
    /// Compact description of the page for decision context.
    pub summary: String,
    pub forms: Vec<String>,
    pub dialogs: Vec<String>,
    pub has_search_box: bool,
    pub has_forms: bool,
    pub interactive_count: usize,
    pub network_requests: Vec<String>,
    pub console_errors: Vec<String>,
    #[serde(skip)]
    pub html: String,
}

/// Comparable signature of a UI state. Equality is by `combined_hash` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFingerprint {
    pub url_hash: String,
    pub dom_structure_hash: String,
    pub visible_text_hash: String,
    pub form_state_hash: String,
    pub dialog_state_hash: String,
    pub auth_state_id: Option<String>,
    pub combined_hash: String,
}

impl PartialEq for StateFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.combined_hash == other.combined_hash
    }
}

impl Eq for StateFingerprint {}

impl Hash for StateFingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.combined_hash.hash(state);
    }
}

impl StateFingerprint {
    pub fn from_observation(observation: &PageObservation) -> Self {
        let url_hash = digest(&url_identity(&observation.url));
        let dom_structure_hash = digest(&observation.dom_structure);
        let visible_text_hash = digest(&observation.visible_text);
        let form_state_hash = digest(&observation.form_state);
        let dialog_state_hash = digest(&observation.dialog_state);
        let auth_state_id = if observation.auth_markers.is_empty() {
            None
        } else {
            Some(digest(&observation.auth_markers.join("|")))
        };
        let combined_hash = digest(&format!(
            "{}:{}:{}:{}",
            url_hash, dom_structure_hash, form_state_hash, dialog_state_hash
        ));

        Self {
            url_hash,
            dom_structure_hash,
            visible_text_hash,
            form_state_hash,
            dialog_state_hash,
            auth_state_id,
            combined_hash,
        }
    }

    /// Fraction of the four identity facets that agree. Diagnostic only.
    pub fn similarity(&self, other: &StateFingerprint) -> f64 {
        let matching = [
            self.url_hash == other.url_hash,
            self.dom_structure_hash == other.dom_structure_hash,
            self.form_state_hash == other.form_state_hash,
            self.dialog_state_hash == other.dialog_state_hash,
        ]
        .iter()
        .filter(|m| **m)
        .count();
        matching as f64 / 4.0
    }

    /// Names of the identity facets that differ from `other`.
    pub fn changed_facets(&self, other: &StateFingerprint) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.url_hash != other.url_hash {
            changed.push("url");
        }
        if self.dom_structure_hash != other.dom_structure_hash {
            changed.push("dom");
        }
        if self.form_state_hash != other.form_state_hash {
            changed.push("form");
        }
        if self.dialog_state_hash != other.dialog_state_hash {
            changed.push("dialog");
        }
        changed
    }
}

/// Observes live pages and turns them into fingerprints.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Gathers every facet of the current page. Extractors run concurrently
    /// and a failing extractor leaves its facet empty.
    pub async fn observe(&self, browser: &dyn Browser) -> PageObservation {
        let (url, html, cookies, network, console) = tokio::join!(
            browser.url(),
            browser.snapshot(),
            browser.eval(COOKIE_SCRIPT),
            browser.eval(NETWORK_SCRIPT),
            browser.eval(CONSOLE_SCRIPT),
        );

        let url = url.unwrap_or_else(|e| {
            debug!("URL extractor failed: {}", e);
            String::new()
        });
        let html = html.unwrap_or_else(|e| {
            debug!("DOM snapshot failed: {}", e);
            String::new()
        });
        let cookies = match cookies {
            Ok(Value::String(s)) => s,
            _ => String::new(),
        };

        let mut observation = PageObservation::parse(&url, &html, &cookies, &self.config);
        observation.network_requests = string_list(network.ok());
        observation.console_errors = string_list(console.ok());
        observation
    }

    pub fn capture(&self, observation: &PageObservation) -> StateFingerprint {
        StateFingerprint::from_observation(observation)
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }
}

impl PageObservation {
    /// Builds an observation from a DOM snapshot.
    pub fn parse(url: &str, html: &str, cookies: &str, config: &FingerprintConfig) -> Self {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let title = select_first_text(&document, "title");

        let mut dom_structure = String::new();
        write_structure(root, 0, config.max_tree_depth, &mut dom_structure);

        let mut text = String::new();
        collect_visible_text(root, &mut text);
        let visible_text = truncate_bytes(&collapse_whitespace(&text), config.visible_text_bytes);

        let (form_state, forms) = extract_forms(&document, url);
        let dialogs = extract_dialogs(&document);
        let dialog_state = dialogs.join("|");
        let auth_markers = extract_auth_markers(&document, cookies);

        let has_search_box = selector_matches(
            &document,
            "input[type=search], [role=search], input[name*=search], input[placeholder*=earch], input[name=q]",
        );
        let interactive_count = count_matches(
            &document,
            "a[href], button, input:not([type=hidden]), select, textarea, [role=button], [role=link]",
        );
        let summary = build_summary(&document, &title, url, config.summary_chars);

        Self {
            url: url.to_string(),
            title,
            dom_structure,
            visible_text,
            form_state,
            dialog_state,
            auth_markers,
            summary,
            has_forms: !forms.is_empty(),
            forms,
            dialogs,
            has_search_box,
            interactive_count,
            network_requests: Vec::new(),
            console_errors: Vec::new(),
            html: html.to_string(),
        }
    }
}

pub(crate) fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..8])
}

/// Path and query of a URL; the raw string if it does not parse.
fn url_identity(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path().trim_end_matches('/');
            let path = if path.is_empty() { "/" } else { path };
            match parsed.query() {
                Some(q) => format!("{}?{}", path, q),
                None => path.to_string(),
            }
        }
        Err(_) => url.to_string(),
    }
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn segments(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

/// Loaders, toasts, timestamps, avatars, ads and animating elements.
pub fn is_transient(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if el.name() == "time" {
        return true;
    }
    if el.attr("aria-busy") == Some("true") {
        return true;
    }
    if let Some(live) = el.attr("aria-live")
        && live != "off"
    {
        return true;
    }
    if let Some(role) = el.attr("role")
        && TRANSIENT_ROLES.contains(&role)
    {
        return true;
    }
    let marked = |attr: Option<&str>| {
        attr.map(|v| segments(v).any(|s| TRANSIENT_WORDS.contains(&s.as_str())))
            .unwrap_or(false)
    };
    marked(el.attr("class")) || marked(el.attr("id"))
}

pub(crate) fn is_hidden(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if el.attr("hidden").is_some() || el.attr("aria-hidden") == Some("true") {
        return true;
    }
    if el.name() == "input" && el.attr("type") == Some("hidden") {
        return true;
    }
    el.attr("style")
        .map(|s| {
            let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            compact.contains("display:none") || compact.contains("visibility:hidden")
        })
        .unwrap_or(false)
}

fn is_ignored(element: ElementRef<'_>) -> bool {
    IGNORED_TAGS.contains(&element.value().name())
}

fn write_structure(element: ElementRef<'_>, depth: usize, max_depth: usize, out: &mut String) {
    if depth > max_depth || is_ignored(element) || is_transient(element) {
        return;
    }
    let el = element.value();
    out.push_str(el.name());
    if let Some(role) = el.attr("role") {
        out.push_str("[role=");
        out.push_str(role);
        out.push(']');
    }
    if let Some(kind) = el.attr("type") {
        out.push_str("[type=");
        out.push_str(kind);
        out.push(']');
    }
    if el.name() == "dialog" && el.attr("open").is_some() {
        out.push_str("[open]");
    }

    let children: Vec<ElementRef<'_>> = element.children().filter_map(ElementRef::wrap).collect();
    if !children.is_empty() && depth < max_depth {
        out.push('(');
        for child in children {
            write_structure(child, depth + 1, max_depth, out);
        }
        out.push(')');
    }
    out.push(';');
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    if is_ignored(element) || is_transient(element) || is_hidden(element) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_visible_text(child, out);
                }
            }
            _ => {}
        }
    }
}

pub(crate) fn within_transient(element: ElementRef<'_>) -> bool {
    is_transient(element)
        || element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(is_transient)
}

fn extract_forms(document: &Html, url: &str) -> (String, Vec<String>) {
    let page = url_identity(url);
    let mut fields = Vec::new();
    let mut forms = Vec::new();

    let Ok(form_selector) = Selector::parse("form") else {
        return (String::new(), forms);
    };
    let Ok(field_selector) = Selector::parse("input, select, textarea") else {
        return (String::new(), forms);
    };

    for (index, form) in document.select(&form_selector).enumerate() {
        if within_transient(form) {
            continue;
        }
        let key = form
            .value()
            .attr("id")
            .map(|id| format!("#{}", id))
            .or_else(|| form.value().attr("name").map(|n| format!("[name={}]", n)))
            .or_else(|| form.value().attr("action").map(|a| format!("->{}", a)))
            .unwrap_or_else(|| format!("form{}", index));
        forms.push(format!("{}{}", page, key));
    }

    for field in document.select(&field_selector) {
        if within_transient(field) {
            continue;
        }
        let el = field.value();
        let kind = el
            .attr("type")
            .unwrap_or(if el.name() == "input" { "text" } else { el.name() })
            .to_lowercase();
        if matches!(
            kind.as_str(),
            "hidden" | "submit" | "button" | "image" | "reset"
        ) {
            continue;
        }
        let name = el.attr("name").or_else(|| el.attr("id")).unwrap_or("");
        let value = if el.name() == "textarea" {
            field.text().collect::<String>()
        } else {
            el.attr("value").unwrap_or("").to_string()
        };
        // Only emptiness is recorded, for password fields and everything else alike
        let filled = if value.trim().is_empty() {
            "empty"
        } else {
            "filled"
        };
        let mut entry = format!("{}:{}:{}", name, kind, filled);
        if matches!(kind.as_str(), "checkbox" | "radio") {
            entry.push_str(if el.attr("checked").is_some() {
                ":checked"
            } else {
                ":unchecked"
            });
        }
        fields.push(entry);
    }

    (fields.join("|"), forms)
}

fn extract_dialogs(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse(
        "dialog, [role=dialog], [role=alertdialog], [aria-modal=true], [class*=modal]",
    ) else {
        return Vec::new();
    };
    let heading = Selector::parse("h1, h2, h3, h4").ok();

    let mut dialogs = Vec::new();
    for element in document.select(&selector) {
        let el = element.value();
        if el.name() == "dialog" && el.attr("open").is_none() {
            continue;
        }
        let explicit = el.name() == "dialog"
            || matches!(el.attr("role"), Some("dialog") | Some("alertdialog"))
            || el.attr("aria-modal") == Some("true");
        let modal_class = !matches!(el.name(), "a" | "button" | "input")
            && el
                .attr("class")
                .map(|c| segments(c).any(|s| s == "modal"))
                .unwrap_or(false);
        if !explicit && !modal_class {
            continue;
        }
        if is_hidden(element)
            || element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(is_hidden)
        {
            continue;
        }
        let role = el.attr("role").unwrap_or("dialog");
        let label = el
            .attr("aria-label")
            .map(str::to_string)
            .or_else(|| {
                heading.as_ref().and_then(|h| {
                    element
                        .select(h)
                        .next()
                        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
                })
            })
            .unwrap_or_else(|| {
                truncate_bytes(&collapse_whitespace(&element.text().collect::<String>()), 40)
            });
        dialogs.push(format!("{}:{}", role, label));
    }
    dialogs
}

fn extract_auth_markers(document: &Html, cookies: &str) -> Vec<String> {
    let mut markers = BTreeSet::new();

    if let Ok(selector) = Selector::parse("a, button, [role=button], [role=menuitem]") {
        for element in document.select(&selector) {
            let text = collapse_whitespace(&element.text().collect::<String>()).to_lowercase();
            if ["log out", "logout", "sign out", "signout"]
                .iter()
                .any(|k| text.contains(k))
            {
                markers.insert("logout_affordance".to_string());
            } else if ["log in", "login", "sign in", "signin"]
                .iter()
                .any(|k| text.contains(k))
            {
                markers.insert("login_affordance".to_string());
            }
        }
    }

    if let Ok(selector) = Selector::parse("[id], [class]") {
        let account_ui = document.select(&selector).any(|element| {
            let el = element.value();
            [el.attr("id"), el.attr("class")].into_iter().flatten().any(|v| {
                segments(v).any(|s| matches!(s.as_str(), "account" | "profile" | "usermenu"))
                    || v.to_lowercase().contains("user-menu")
            })
        });
        if account_ui {
            markers.insert("account_ui".to_string());
        }
    }

    if selector_matches(document, "input[type=password]") {
        markers.insert("password_field".to_string());
    }

    for cookie in cookies.split(';') {
        let name = cookie.split('=').next().unwrap_or("").trim().to_lowercase();
        if !name.is_empty() && AUTH_COOKIE_HINTS.iter().any(|h| name.contains(h)) {
            markers.insert(format!("cookie:{}", name));
        }
    }

    markers.into_iter().collect()
}

fn build_summary(document: &Html, title: &str, url: &str, limit: usize) -> String {
    let mut summary = format!("url: {}\ntitle: {}\n", url, title);

    if let Ok(selector) = Selector::parse("h1, h2, h3") {
        let headings: Vec<String> = document
            .select(&selector)
            .filter(|e| !within_transient(*e))
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .take(5)
            .collect();
        if !headings.is_empty() {
            summary.push_str(&format!("headings: {}\n", headings.join(" | ")));
        }
    }

    if let Ok(selector) = Selector::parse("a[href], button, [role=button], input, select, textarea")
    {
        let labels: Vec<String> = document
            .select(&selector)
            .filter(|e| !within_transient(*e) && !is_hidden(*e))
            .filter_map(|e| {
                let text = collapse_whitespace(&e.text().collect::<String>());
                let label = if text.is_empty() {
                    e.value()
                        .attr("aria-label")
                        .or_else(|| e.value().attr("placeholder"))
                        .or_else(|| e.value().attr("name"))
                        .unwrap_or("")
                        .to_string()
                } else {
                    text
                };
                (!label.is_empty()).then(|| format!("{}:{}", e.value().name(), label))
            })
            .take(15)
            .collect();
        if !labels.is_empty() {
            summary.push_str(&format!("interactive: {}\n", labels.join(", ")));
        }
    }

    truncate_bytes(&summary, limit)
}

fn select_first_text(document: &Html, selector: &str) -> String {
    Selector::parse(selector)
        .ok()
        .and_then(|s| {
            document
                .select(&s)
                .next()
                .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        })
        .unwrap_or_default()
}

fn selector_matches(document: &Html, selector: &str) -> bool {
    count_matches(document, selector) > 0
}

fn count_matches(document: &Html, selector: &str) -> usize {
    Selector::parse(selector)
        .map(|s| document.select(&s).count())
        .unwrap_or(0)
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates to at most `limit` bytes without splitting a character.
pub(crate) fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_identity_ignores_host_and_trailing_slash() {
        assert_eq!(url_identity("https://example.com/a/b/"), "/a/b");
        assert_eq!(url_identity("https://example.com"), "/");
        assert_eq!(url_identity("https://example.com/s?q=1"), "/s?q=1");
    }

    #[test]
    fn test_truncate_bytes_respects_char_boundaries() {
        assert_eq!(truncate_bytes("héllo", 2), "h");
        assert_eq!(truncate_bytes("abc", 10), "abc");
    }

    #[test]
    fn test_segments_split_on_dashes() {
        let parts: Vec<String> = segments("toast-xyz user_avatar").collect();
        assert_eq!(parts, vec!["toast", "xyz", "user", "avatar"]);
    }
}
