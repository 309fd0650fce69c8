// Scripted in-memory site and browser used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;
use wayfinder_driver::error::Result;
use wayfinder_driver::{Browser, BrowserFactory, Decider, DeciderRequest, DriverError, split_nth};

pub const ROOT: &str = "http://shop.test/";

/// Failure injected into clicks on one selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Closed,
    Timeout,
}

impl Fault {
    fn to_error(self, selector: &str) -> DriverError {
        match self {
            Fault::Closed => DriverError::Closed("page has been closed".to_string()),
            Fault::Timeout => DriverError::Timeout {
                operation: format!("click {}", selector),
                ms: 30_000,
            },
        }
    }
}

#[derive(Default)]
struct Faults {
    once: HashMap<String, VecDeque<Fault>>,
    always: HashMap<String, Fault>,
}

/// Pages keyed by absolute URL, plus shared fault and call bookkeeping.
#[derive(Clone, Default)]
pub struct Site {
    pages: Arc<HashMap<String, String>>,
    faults: Arc<Mutex<Faults>>,
    calls: Arc<Mutex<Vec<String>>>,
    launches: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

fn canonical(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl Site {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        let pages = pages
            .iter()
            .map(|(url, body)| (canonical(url), page(body)))
            .collect();
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    /// Home, about and pricing pages that all link back home.
    pub fn shop() -> Self {
        Self::new(&[
            (
                ROOT,
                r#"<nav><a id="about" href="/about">About</a> <a id="pricing" href="/pricing">Pricing</a></nav><h1>Welcome</h1>"#,
            ),
            (
                "http://shop.test/about",
                r#"<a id="home" href="/">Home</a><h1>About us</h1>"#,
            ),
            (
                "http://shop.test/pricing",
                r#"<a id="home" href="/">Home</a><h1>Plans</h1>"#,
            ),
        ])
    }

    pub fn fail_once(&self, selector: &str, fault: Fault) {
        let mut faults = self.faults.lock().unwrap();
        faults
            .once
            .entry(selector.to_string())
            .or_default()
            .push_back(fault);
    }

    pub fn fail_always(&self, selector: &str, fault: Fault) {
        let mut faults = self.faults.lock().unwrap();
        faults.always.insert(selector.to_string(), fault);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> Arc<dyn BrowserFactory> {
        Arc::new(FakeFactory { site: self.clone() })
    }

    pub fn browser(&self) -> FakeBrowser {
        FakeBrowser {
            site: self.clone(),
            current: Mutex::new(None),
        }
    }

    fn fault_for(&self, selector: &str) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        if let Some(fault) = faults.once.get_mut(selector).and_then(|q| q.pop_front()) {
            return Some(fault);
        }
        faults.always.get(selector).copied()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn page(body: &str) -> String {
    let title = if body.contains("About us") {
        "About"
    } else if body.contains("Plans") {
        "Pricing"
    } else {
        "Shop"
    };
    format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, body
    )
}

/// Finds the element a selector points at and returns its href, if any.
fn resolve_target(html: &str, selector: &str) -> Result<Option<String>> {
    let (base, nth) = split_nth(selector);
    let document = Html::parse_document(html);
    let parsed =
        Selector::parse(base).map_err(|_| DriverError::InvalidSelector(base.to_string()))?;
    let matches: Vec<_> = document.select(&parsed).collect();
    if matches.is_empty() {
        return Err(DriverError::ElementNotFound(selector.to_string()));
    }
    if matches.len() > 1 && nth.is_none() {
        return Err(DriverError::AmbiguousSelector {
            selector: base.to_string(),
            count: matches.len(),
        });
    }
    let element = matches
        .get(nth.unwrap_or(0))
        .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
    Ok(element.value().attr("href").map(str::to_string))
}

pub struct FakeBrowser {
    site: Site,
    current: Mutex<Option<String>>,
}

impl FakeBrowser {
    fn current_url(&self) -> Result<String> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DriverError::Navigation("no page loaded".to_string()))
    }

    fn current_html(&self) -> Result<String> {
        let url = self.current_url()?;
        self.site
            .pages
            .get(&url)
            .cloned()
            .ok_or_else(|| DriverError::Navigation(format!("404 for {}", url)))
    }

    fn touch(&self, selector: &str) -> Result<Option<String>> {
        let (base, _) = split_nth(selector);
        if let Some(fault) = self.site.fault_for(base) {
            return Err(fault.to_error(selector));
        }
        resolve_target(&self.current_html()?, selector)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open(&self, url: &str) -> Result<()> {
        self.site.log(format!("open {}", url));
        let url = canonical(url);
        if !self.site.pages.contains_key(&url) {
            return Err(DriverError::Navigation(format!("404 for {}", url)));
        }
        *self.current.lock().unwrap() = Some(url);
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.site.log(format!("click {}", selector));
        if let Some(href) = self.touch(selector)? {
            let base = Url::parse(&self.current_url()?)
                .map_err(|e| DriverError::InvalidUrl(e.to_string()))?;
            let target = base
                .join(&href)
                .map_err(|e| DriverError::InvalidUrl(e.to_string()))?;
            self.open(target.as_str()).await?;
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        self.site.log(format!("fill {} {}", selector, text));
        self.touch(selector).map(|_| ())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        self.site.log(format!("select {} {}", selector, value));
        self.touch(selector).map(|_| ())
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.site.log(format!("press {}", key));
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.site.log(format!("hover {}", selector));
        self.touch(selector).map(|_| ())
    }

    async fn get_text(&self, selector: &str) -> Result<String> {
        let html = self.current_html()?;
        let document = Html::parse_document(&html);
        let parsed = Selector::parse(selector)
            .map_err(|_| DriverError::InvalidSelector(selector.to_string()))?;
        let text = document
            .select(&parsed)
            .next()
            .map(|el| el.text().collect::<String>())
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
        Ok(text)
    }

    async fn url(&self) -> Result<String> {
        self.current_url()
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn snapshot(&self) -> Result<String> {
        self.current_html()
    }

    async fn eval(&self, _script: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn set_viewport_size(&self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    async fn wait_for_stability(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.site.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeFactory {
    site: Site,
}

#[async_trait]
impl BrowserFactory for FakeFactory {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        self.site.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.site.browser()))
    }
}

/// Decider that replays one canned reply and counts its calls.
pub struct CountingDecider {
    reply: Option<Value>,
    calls: AtomicUsize,
}

impl CountingDecider {
    pub fn replying(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply),
            calls: AtomicUsize::new(0),
        })
    }

    /// Every call fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decider for CountingDecider {
    async fn decide(&self, _request: DeciderRequest) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| DriverError::Decider("503 Service Unavailable".to_string()))
    }
}
