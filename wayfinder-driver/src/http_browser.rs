use crate::browser::{Browser, BrowserFactory, split_nth};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::cookie::{CookieStore, Jar};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// A browser that speaks plain HTTP and parses HTML, without running scripts.
///
/// Links are followed on click, forms are submitted (GET or POST) when a
/// submit control is clicked or Enter is pressed in a filled field, and
/// `eval` understands a handful of read-only expressions. Enough to explore
/// server-rendered sites and to exercise the core in tests.
pub struct HttpBrowser {
    client: Client,
    jar: Arc<Jar>,
    state: Mutex<PageState>,
    timeout_secs: u64,
}

#[derive(Default)]
struct PageState {
    url: Option<Url>,
    html: String,
    form_values: HashMap<String, String>,
    last_field: Option<String>,
    viewport: (u32, u32),
    closed: bool,
}

/// What a click on an element amounts to over plain HTTP.
#[derive(Debug, PartialEq)]
enum ClickTarget {
    Link(String),
    Submit(FormRequest),
    Inert,
}

#[derive(Debug, PartialEq)]
struct FormRequest {
    post: bool,
    action: String,
    fields: Vec<(String, String)>,
}

impl HttpBrowser {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent("Wayfinder/0.1 (https://github.com/trapdoorsec/wayfinder)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            jar,
            state: Mutex::new(PageState {
                viewport: (1280, 800),
                ..PageState::default()
            }),
            timeout_secs,
        })
    }

    async fn load(&self, request: reqwest::RequestBuilder, target: &str) -> Result<()> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout {
                    operation: format!("navigating to {}", target),
                    ms: self.timeout_secs * 1000,
                }
            } else if e.is_connect() {
                DriverError::Navigation(format!("could not connect to {}: {}", target, e))
            } else {
                DriverError::Http(e)
            }
        })?;

        let final_url = response.url().clone();
        let status = response.status();
        let body = response.text().await?;
        debug!("Loaded {} ({}, {} bytes)", final_url, status, body.len());

        let mut state = self.state.lock().await;
        state.url = Some(final_url);
        state.html = body;
        state.form_values.clear();
        state.last_field = None;
        Ok(())
    }

    async fn submit(&self, form: FormRequest) -> Result<()> {
        info!(
            "Submitting form to {} ({} fields)",
            form.action,
            form.fields.len()
        );
        let request = if form.post {
            self.client.post(&form.action).form(&form.fields)
        } else {
            let mut url = Url::parse(&form.action)
                .map_err(|e| DriverError::InvalidUrl(format!("{}: {}", form.action, e)))?;
            url.query_pairs_mut().clear().extend_pairs(form.fields.iter());
            self.client.get(url)
        };
        self.load(request, &form.action).await
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(DriverError::Closed("browser has been closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open(&self, url: &str) -> Result<()> {
        self.ensure_open().await?;
        let parsed =
            Url::parse(url).map_err(|e| DriverError::InvalidUrl(format!("{}: {}", url, e)))?;
        self.load(self.client.get(parsed), url).await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.ensure_open().await?;
        let target = {
            let state = self.state.lock().await;
            let page_url = current_url(&state)?;
            resolve_click(&state.html, page_url, selector, &state.form_values)?
        };

        match target {
            ClickTarget::Link(href) => self.load(self.client.get(&href), &href).await,
            ClickTarget::Submit(form) => self.submit(form).await,
            ClickTarget::Inert => {
                debug!("Click on {} has no effect without scripts", selector);
                Ok(())
            }
        }
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        self.ensure_open().await?;
        let mut state = self.state.lock().await;
        let field = field_name(&state.html, selector)?;
        state.form_values.insert(field, text.to_string());
        state.last_field = Some(selector.to_string());
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        self.fill(selector, value).await
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.ensure_open().await?;
        if !key.eq_ignore_ascii_case("enter") {
            return Ok(());
        }
        let form = {
            let state = self.state.lock().await;
            let Some(field) = state.last_field.clone() else {
                return Ok(());
            };
            let page_url = current_url(&state)?;
            enclosing_form_request(&state.html, page_url, &field, &state.form_values)?
        };
        match form {
            Some(form) => self.submit(form).await,
            None => Ok(()),
        }
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.ensure_open().await?;
        let state = self.state.lock().await;
        let document = Html::parse_document(&state.html);
        select_one(&document, selector).map(|_| ())
    }

    async fn get_text(&self, selector: &str) -> Result<String> {
        self.ensure_open().await?;
        let state = self.state.lock().await;
        let document = Html::parse_document(&state.html);
        let element = select_one(&document, selector)?;
        Ok(collapse_whitespace(&element.text().collect::<String>()))
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open().await?;
        let state = self.state.lock().await;
        Ok(current_url(&state)?.to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Err(DriverError::Unsupported(
            "screenshots need a rendering browser".to_string(),
        ))
    }

    async fn snapshot(&self) -> Result<String> {
        self.ensure_open().await?;
        Ok(self.state.lock().await.html.clone())
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        self.ensure_open().await?;
        let state = self.state.lock().await;
        let value = match script.trim().trim_end_matches(';') {
            "location.href" | "window.location.href" => state
                .url
                .as_ref()
                .map(|u| Value::String(u.to_string()))
                .unwrap_or(Value::Null),
            "document.title" => {
                let document = Html::parse_document(&state.html);
                let title = Selector::parse("title")
                    .ok()
                    .and_then(|sel| document.select(&sel).next().map(|t| t.text().collect()))
                    .unwrap_or_default();
                Value::String(title)
            }
            "document.cookie" => state
                .url
                .as_ref()
                .and_then(|u| self.jar.cookies(u))
                .and_then(|h| h.to_str().ok().map(str::to_string))
                .map(Value::String)
                .unwrap_or_else(|| Value::String(String::new())),
            _ => {
                debug!("Script evaluation is not available over HTTP: {}", script);
                Value::Null
            }
        };
        Ok(value)
    }

    async fn set_viewport_size(&self, width: u32, height: u32) -> Result<()> {
        self.state.lock().await.viewport = (width, height);
        Ok(())
    }

    async fn wait_for_stability(&self) -> Result<()> {
        self.ensure_open().await
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

/// Launches [`HttpBrowser`] sessions.
pub struct HttpBrowserFactory {
    timeout_secs: u64,
}

impl HttpBrowserFactory {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Default for HttpBrowserFactory {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl BrowserFactory for HttpBrowserFactory {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        Ok(Box::new(HttpBrowser::with_timeout(self.timeout_secs)?))
    }
}

fn current_url(state: &PageState) -> Result<&Url> {
    state
        .url
        .as_ref()
        .ok_or_else(|| DriverError::Navigation("no page has been opened".to_string()))
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| DriverError::InvalidSelector(selector.to_string()))
}

/// Resolves a selector to exactly one element, honouring `>> nth=N`.
fn select_one<'a>(document: &'a Html, selector: &str) -> Result<ElementRef<'a>> {
    let (base, nth) = split_nth(selector);
    let parsed = parse_selector(base)?;
    let matches: Vec<ElementRef<'a>> = document.select(&parsed).collect();

    match (matches.len(), nth) {
        (0, _) => Err(DriverError::ElementNotFound(selector.to_string())),
        (_, Some(index)) => matches
            .get(index)
            .copied()
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string())),
        (1, None) => Ok(matches[0]),
        (count, None) => Err(DriverError::AmbiguousSelector {
            selector: selector.to_string(),
            count,
        }),
    }
}

fn field_name(html: &str, selector: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let element = select_one(&document, selector)?;
    Ok(element
        .value()
        .attr("name")
        .or_else(|| element.value().attr("id"))
        .unwrap_or(selector)
        .to_string())
}

fn resolve_click(
    html: &str,
    page_url: &Url,
    selector: &str,
    form_values: &HashMap<String, String>,
) -> Result<ClickTarget> {
    let document = Html::parse_document(html);
    let element = select_one(&document, selector)?;
    let tag = element.value().name();

    if element.value().attr("disabled").is_some() {
        return Ok(ClickTarget::Inert);
    }

    let link = if tag == "a" {
        Some(element)
    } else {
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "a")
    };
    if let Some(link) = link
        && let Some(href) = link.value().attr("href")
        && let Some(resolved) = resolve_href(page_url, href)
    {
        return Ok(ClickTarget::Link(resolved));
    }

    let input_type = element.value().attr("type").unwrap_or("").to_lowercase();
    let submits = match tag {
        "button" => input_type.is_empty() || input_type == "submit",
        "input" => input_type == "submit" || input_type == "image",
        _ => false,
    };
    if submits && let Some(form) = enclosing_form(element) {
        let mut request = build_form_request(form, page_url, form_values);
        if let Some(name) = element.value().attr("name") {
            let value = element.value().attr("value").unwrap_or("").to_string();
            request.fields.push((name.to_string(), value));
        }
        return Ok(ClickTarget::Submit(request));
    }

    Ok(ClickTarget::Inert)
}

fn enclosing_form(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "form")
}

fn enclosing_form_request(
    html: &str,
    page_url: &Url,
    field_selector: &str,
    form_values: &HashMap<String, String>,
) -> Result<Option<FormRequest>> {
    let document = Html::parse_document(html);
    let element = select_one(&document, field_selector)?;
    Ok(enclosing_form(element).map(|form| build_form_request(form, page_url, form_values)))
}

fn build_form_request(
    form: ElementRef<'_>,
    page_url: &Url,
    form_values: &HashMap<String, String>,
) -> FormRequest {
    let post = form
        .value()
        .attr("method")
        .map(|m| m.eq_ignore_ascii_case("post"))
        .unwrap_or(false);
    let action = form
        .value()
        .attr("action")
        .filter(|a| !a.trim().is_empty())
        .and_then(|a| page_url.join(a).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut fields = Vec::new();
    if let Ok(field_selector) = Selector::parse("input[name], select[name], textarea[name]") {
        for field in form.select(&field_selector) {
            let Some(name) = field.value().attr("name") else {
                continue;
            };
            let kind = field.value().attr("type").unwrap_or("text").to_lowercase();
            if matches!(kind.as_str(), "submit" | "button" | "image" | "reset" | "file") {
                continue;
            }
            if let Some(filled) = form_values.get(name) {
                fields.push((name.to_string(), filled.clone()));
                continue;
            }
            if matches!(kind.as_str(), "checkbox" | "radio")
                && field.value().attr("checked").is_none()
            {
                continue;
            }
            let value = if field.value().name() == "select" {
                default_option(field)
            } else if field.value().name() == "textarea" {
                field.text().collect()
            } else {
                field.value().attr("value").unwrap_or("").to_string()
            };
            fields.push((name.to_string(), value));
        }
    }

    FormRequest {
        post,
        action: action.to_string(),
        fields,
    }
}

fn default_option(select: ElementRef<'_>) -> String {
    let Ok(option_selector) = Selector::parse("option") else {
        return String::new();
    };
    let options: Vec<ElementRef<'_>> = select.select(&option_selector).collect();
    options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())
        .map(|o| {
            o.value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| o.text().collect())
        })
        .unwrap_or_default()
}

fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url.to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
