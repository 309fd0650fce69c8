pub mod browser;
pub mod decider;
pub mod error;
pub mod http_browser;

pub use browser::{Browser, BrowserFactory, split_nth};
pub use decider::{Decider, DeciderRequest, HttpDecider};
pub use error::DriverError;
pub use http_browser::{HttpBrowser, HttpBrowserFactory};
