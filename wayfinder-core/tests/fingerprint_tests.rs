// Tests for state fingerprinting

mod support;

use support::{ROOT, Site};
use wayfinder_core::config::FingerprintConfig;
use wayfinder_core::fingerprint::{Fingerprinter, PageObservation, StateFingerprint};
use wayfinder_driver::Browser;

fn fingerprint(url: &str, body: &str) -> StateFingerprint {
    let html = format!(
        "<html><head><title>Shop</title></head><body>{}</body></html>",
        body
    );
    let observation = PageObservation::parse(url, &html, "", &FingerprintConfig::default());
    StateFingerprint::from_observation(&observation)
}

const PAGE: &str = r#"<main><h1>Checkout</h1>
<form id="checkout"><input name="email" type="email"><button type="submit">Pay</button></form>
</main>"#;

// ============================================================================
// Stability Tests
// ============================================================================

#[test]
fn test_same_page_same_fingerprint() {
    let a = fingerprint("https://example.com/checkout", PAGE);
    let b = fingerprint("https://example.com/checkout", PAGE);
    assert_eq!(a.combined_hash, b.combined_hash);
    assert_eq!(a, b);
    assert_eq!(a.similarity(&b), 1.0);
}

#[test]
fn test_toast_does_not_change_identity() {
    let quiet = fingerprint("https://example.com/checkout", PAGE);
    let with_toast = fingerprint(
        "https://example.com/checkout",
        &format!(
            r#"{}<div class="toast-container"><div class="toast">Saved at 12:01:33</div></div>"#,
            PAGE
        ),
    );
    assert_eq!(quiet.combined_hash, with_toast.combined_hash);
    assert!(quiet.changed_facets(&with_toast).is_empty());
}

#[test]
fn test_spinners_and_live_regions_are_ignored() {
    let base = fingerprint("https://example.com/checkout", PAGE);
    let busy = fingerprint(
        "https://example.com/checkout",
        &format!(
            r#"<div class="loading-spinner"><span>Loading</span></div><p aria-live="polite">3 items</p>{}<time>2 minutes ago</time>"#,
            PAGE
        ),
    );
    assert_eq!(base.combined_hash, busy.combined_hash);
}

#[test]
fn test_text_only_change_keeps_identity() {
    let a = fingerprint("https://example.com/", "<main><p>Hello Ada</p></main>");
    let b = fingerprint("https://example.com/", "<main><p>Hello Grace</p></main>");
    assert_eq!(a.combined_hash, b.combined_hash);
    assert_ne!(a.visible_text_hash, b.visible_text_hash);
}

#[test]
fn test_trailing_slash_and_fragment_free_urls_match() {
    let a = fingerprint("https://example.com/pricing", PAGE);
    let b = fingerprint("https://example.com/pricing/", PAGE);
    assert_eq!(a.url_hash, b.url_hash);
}

// ============================================================================
// Change Detection Tests
// ============================================================================

#[test]
fn test_open_dialog_changes_identity() {
    let closed = fingerprint("https://example.com/checkout", PAGE);
    let open = fingerprint(
        "https://example.com/checkout",
        &format!(
            r#"{}<div role="dialog" aria-label="Confirm payment"><button>OK</button></div>"#,
            PAGE
        ),
    );
    assert_ne!(closed.combined_hash, open.combined_hash);
    assert!(closed.changed_facets(&open).contains(&"dialog"));
}

#[test]
fn test_filled_field_changes_form_state() {
    let empty = fingerprint("https://example.com/checkout", PAGE);
    let filled = fingerprint(
        "https://example.com/checkout",
        &PAGE.replace(
            r#"type="email">"#,
            r#"type="email" value="a@b.co">"#,
        ),
    );
    assert_ne!(empty.form_state_hash, filled.form_state_hash);
    assert_ne!(empty.combined_hash, filled.combined_hash);
    assert_eq!(empty.changed_facets(&filled), vec!["form"]);
}

#[test]
fn test_different_path_changes_url_facet() {
    let a = fingerprint("https://example.com/a", PAGE);
    let b = fingerprint("https://example.com/b", PAGE);
    assert_ne!(a.combined_hash, b.combined_hash);
    assert_eq!(a.changed_facets(&b), vec!["url"]);
    assert_eq!(a.similarity(&b), 0.75);
}

#[test]
fn test_auth_markers_are_diagnostic_only() {
    let anonymous = fingerprint("https://example.com/", r#"<main><p>Hi</p></main>"#);
    let html = "<html><head><title>Shop</title></head><body><main><p>Hi</p></main></body></html>";
    let observation = PageObservation::parse(
        "https://example.com/",
        html,
        "session_id=abc123",
        &FingerprintConfig::default(),
    );
    let signed_in = StateFingerprint::from_observation(&observation);

    assert!(anonymous.auth_state_id.is_none());
    assert!(signed_in.auth_state_id.is_some());
    assert_eq!(anonymous.combined_hash, signed_in.combined_hash);
}

// ============================================================================
// Observation Tests
// ============================================================================

#[test]
fn test_observation_collects_forms_and_search() {
    let html = r#"<html><head><title>Find</title></head><body>
        <form role="search" action="/search"><input type="search" name="q"></form>
    </body></html>"#;
    let observation =
        PageObservation::parse("https://example.com/", html, "", &FingerprintConfig::default());

    assert_eq!(observation.title, "Find");
    assert!(observation.has_forms);
    assert!(observation.has_search_box);
    assert_eq!(observation.forms.len(), 1);
    assert!(observation.interactive_count >= 1);
}

#[tokio::test]
async fn test_live_observation_is_repeatable() {
    let site = Site::shop();
    let browser = site.browser();
    browser.open(ROOT).await.unwrap();

    let fingerprinter = Fingerprinter::new(FingerprintConfig::default());
    let first = fingerprinter.observe(&browser).await;
    let second = fingerprinter.observe(&browser).await;

    assert_eq!(first.url, ROOT);
    assert_eq!(first.title, "Shop");
    assert_eq!(
        fingerprinter.capture(&first),
        fingerprinter.capture(&second)
    );
}
