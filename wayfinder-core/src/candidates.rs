//! Action candidate extraction from a DOM snapshot.

use crate::action::{ActionCandidate, ActionKind, ElementInfo};
use crate::fingerprint::{collapse_whitespace, is_hidden, truncate_bytes, within_transient};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

const INTERACTIVE: &str = "a[href], button, input, select, textarea, summary, \
     [role=button], [role=link], [role=tab], [role=menuitem], [aria-expanded]";

const MAX_CANDIDATES: usize = 150;
const MAX_TEXT_BYTES: usize = 80;

const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

#[derive(Debug, Default, Clone, Copy)]
struct FormFacts {
    disabled_submit: bool,
    unfilled_required: bool,
}

/// Extracts every actionable element from `html`. Hrefs are resolved
/// against `page_url`; off-domain links are kept and left to the scorer.
pub fn extract_candidates(html: &str, page_url: &str) -> Vec<ActionCandidate> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let Ok(interactive) = Selector::parse(INTERACTIVE) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for element in document.select(&interactive) {
        if candidates.len() >= MAX_CANDIDATES {
            debug!("Candidate limit reached on {}", page_url);
            break;
        }
        if is_hidden(element)
            || element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(is_hidden)
            || within_transient(element)
        {
            continue;
        }

        let Some((kind, info)) = describe(element, base.as_ref()) else {
            continue;
        };

        let selector = unique_selector(&document, element);
        let candidate = ActionCandidate::new(selector, kind, info);
        if seen.insert(candidate.key()) {
            candidates.push(candidate);
        }
    }

    candidates
}

fn describe(element: ElementRef<'_>, base: Option<&Url>) -> Option<(ActionKind, ElementInfo)> {
    let el = element.value();
    let tag = el.name().to_string();
    let input_type = el.attr("type").map(|t| t.to_lowercase());

    if tag == "input" && input_type.as_deref() == Some("hidden") {
        return None;
    }

    let mut info = ElementInfo {
        tag: tag.clone(),
        text: element_text(element),
        role: el.attr("role").map(str::to_string),
        input_type: input_type.clone(),
        name: el.attr("name").map(str::to_string),
        placeholder: el.attr("placeholder").map(str::to_string),
        aria_label: el.attr("aria-label").map(str::to_string),
        disabled: is_disabled(element),
        required: el.attr("required").is_some() || el.attr("aria-required") == Some("true"),
        in_nav: in_navigation(element),
        expandable: el.attr("aria-expanded").is_some()
            || el.attr("aria-haspopup").is_some()
            || tag == "summary"
            || el.attr("role") == Some("tab"),
        ..ElementInfo::default()
    };

    if tag == "a"
        && let Some(href) = el.attr("href").map(str::trim)
    {
        let skipped = href.is_empty()
            || href.starts_with('#')
            || SKIPPED_SCHEMES
                .iter()
                .any(|s| href.to_lowercase().starts_with(s));
        if !skipped {
            info.href = Some(match base {
                Some(base) => base.join(href).ok()?.to_string(),
                None => href.to_string(),
            });
        } else if info.role.is_none() {
            // Script-driven anchors only count when they declare a role
            return None;
        }
    }

    let form = enclosing_form(element);
    if let Some(form) = form {
        info.in_form = true;
        let facts = form_facts(form);
        info.is_submit = is_submit_control(element);
        if !info.is_submit {
            info.enables_disabled_submit = facts.disabled_submit;
            info.required_sibling_unfilled = facts.unfilled_required;
        }
    }

    let kind = match tag.as_str() {
        "select" => {
            info.options = option_values(element);
            ActionKind::Select
        }
        "textarea" => ActionKind::Fill,
        "input" => match input_type.as_deref().unwrap_or("text") {
            "submit" | "button" | "image" | "reset" | "checkbox" | "radio" | "file" => {
                ActionKind::Click
            }
            _ => ActionKind::Fill,
        },
        _ => ActionKind::Click,
    };

    Some((kind, info))
}

fn element_text(element: ElementRef<'_>) -> String {
    let text = collapse_whitespace(&element.text().collect::<String>());
    let text = if text.is_empty() && element.value().name() == "input" {
        element.value().attr("value").unwrap_or("").trim().to_string()
    } else {
        text
    };
    truncate_bytes(&text, MAX_TEXT_BYTES)
}

fn is_disabled(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if el.attr("disabled").is_some() || el.attr("aria-disabled") == Some("true") {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "fieldset" && a.value().attr("disabled").is_some())
}

fn in_navigation(element: ElementRef<'_>) -> bool {
    element.ancestors().filter_map(ElementRef::wrap).any(|a| {
        let el = a.value();
        matches!(el.name(), "nav" | "header" | "menu")
            || matches!(el.attr("role"), Some("navigation") | Some("menubar"))
    })
}

fn enclosing_form(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "form")
}

fn is_submit_control(element: ElementRef<'_>) -> bool {
    let el = element.value();
    match el.name() {
        // A button inside a form submits unless told otherwise
        "button" => matches!(
            el.attr("type").map(str::to_lowercase).as_deref(),
            None | Some("submit")
        ),
        "input" => matches!(
            el.attr("type").map(str::to_lowercase).as_deref(),
            Some("submit") | Some("image")
        ),
        _ => false,
    }
}

fn is_filled(element: ElementRef<'_>) -> bool {
    let el = element.value();
    match el.name() {
        "textarea" => !element.text().collect::<String>().trim().is_empty(),
        "select" => true,
        _ => match el.attr("type").map(str::to_lowercase).as_deref() {
            Some("checkbox") | Some("radio") => el.attr("checked").is_some(),
            _ => !el.attr("value").unwrap_or("").trim().is_empty(),
        },
    }
}

fn form_facts(form: ElementRef<'_>) -> FormFacts {
    let mut facts = FormFacts::default();
    let Ok(controls) = Selector::parse("button, input, select, textarea") else {
        return facts;
    };
    for control in form.select(&controls) {
        if is_submit_control(control) {
            facts.disabled_submit |= is_disabled(control);
        } else if control.value().attr("required").is_some() && !is_filled(control) {
            facts.unfilled_required = true;
        }
    }
    facts
}

fn option_values(element: ElementRef<'_>) -> Vec<String> {
    let Ok(option) = Selector::parse("option") else {
        return Vec::new();
    };
    element
        .select(&option)
        .filter(|o| o.value().attr("disabled").is_none())
        .filter_map(|o| {
            let value = o
                .value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| collapse_whitespace(&o.text().collect::<String>()));
            (!value.is_empty()).then_some(value)
        })
        .collect()
}

fn is_css_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn matches_exactly_one(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|s| document.select(&s).take(2).count() == 1)
        .unwrap_or(false)
}

/// Shortest stable selector that addresses exactly this element: id, test
/// id, name, then a structural path as the last resort.
pub fn unique_selector(document: &Html, element: ElementRef<'_>) -> String {
    let el = element.value();
    let tag = el.name();

    if let Some(id) = el.attr("id")
        && is_css_identifier(id)
    {
        let selector = format!("#{}", id);
        if matches_exactly_one(document, &selector) {
            return selector;
        }
    }

    for attr in ["data-testid", "data-test", "name", "aria-label"] {
        if let Some(value) = el.attr(attr)
            && !value.is_empty()
            && !value.contains('"')
            && !value.contains('\\')
        {
            let selector = format!("{}[{}=\"{}\"]", tag, attr, value);
            if matches_exactly_one(document, &selector) {
                return selector;
            }
        }
    }

    structural_path(element)
}

fn structural_path(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut current = Some(element);
    while let Some(el) = current {
        let name = el.value().name();
        if name == "html" {
            parts.push("html".to_string());
            break;
        }
        let position = el
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|s| s.value().name() == name)
            .count()
            + 1;
        parts.push(format!("{}:nth-of-type({})", name, position));
        current = el.parent().and_then(ElementRef::wrap);
    }
    parts.reverse();
    parts.join(" > ")
}
