use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A single live browser session.
///
/// Every call is a suspension point and may fail. Implementations must put
/// recognisable text in their errors ("crashed", "disconnected", "Target
/// closed", "Timeout", `Selector "X" matched N elements`) because callers
/// classify failures by message.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, url: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn fill(&self, selector: &str, text: &str) -> Result<()>;

    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;

    async fn press(&self, key: &str) -> Result<()>;

    async fn hover(&self, selector: &str) -> Result<()>;

    async fn get_text(&self, selector: &str) -> Result<String>;

    /// URL of the currently loaded document.
    async fn url(&self) -> Result<String>;

    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Serialized DOM of the current page.
    async fn snapshot(&self) -> Result<String>;

    async fn eval(&self, script: &str) -> Result<Value>;

    async fn set_viewport_size(&self, width: u32, height: u32) -> Result<()>;

    async fn wait_for_stability(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Launches fresh browser sessions for a pool.
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>>;
}

/// Splits a `>> nth=N` suffix off a selector.
///
/// Returns the base selector and the requested index, if any.
pub fn split_nth(selector: &str) -> (&str, Option<usize>) {
    if let Some((base, suffix)) = selector.rsplit_once(">>") {
        let suffix = suffix.trim();
        if let Some(index) = suffix.strip_prefix("nth=")
            && let Ok(index) = index.trim().parse::<usize>()
        {
            return (base.trim_end(), Some(index));
        }
    }
    (selector, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_nth_plain_selector() {
        assert_eq!(split_nth("button.submit"), ("button.submit", None));
    }

    #[test]
    fn test_split_nth_with_index() {
        assert_eq!(split_nth("button.submit >> nth=0"), ("button.submit", Some(0)));
        assert_eq!(split_nth("a >> nth=12"), ("a", Some(12)));
    }

    #[test]
    fn test_split_nth_ignores_other_chains() {
        assert_eq!(split_nth("div >> text=Hi"), ("div >> text=Hi", None));
    }
}
