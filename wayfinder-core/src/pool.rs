//! Bounded pool of browser sessions.
//!
//! At most `size` sessions are handed out at once. A [`PooledBrowser`]
//! returns its session when dropped, on every exit path; a session marked
//! broken is closed instead of being reused.

use crate::error::{ExploreError, Result};
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use wayfinder_driver::{Browser, BrowserFactory};

type IdleList = Arc<Mutex<Vec<Box<dyn Browser>>>>;

pub struct BrowserPool {
    factory: Arc<dyn BrowserFactory>,
    semaphore: Arc<Semaphore>,
    idle: IdleList,
    viewport: (u32, u32),
    size: usize,
}

impl BrowserPool {
    pub fn new(factory: Arc<dyn BrowserFactory>, size: usize, viewport: (u32, u32)) -> Self {
        let size = size.max(1);
        Self {
            factory,
            semaphore: Arc::new(Semaphore::new(size)),
            idle: Arc::new(Mutex::new(Vec::new())),
            viewport,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sessions currently checked out.
    pub fn in_use(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    /// Waits for a free slot, then reuses an idle session or launches one.
    pub async fn acquire(&self) -> Result<PooledBrowser> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExploreError::Other("browser pool is closed".to_string()))?;

        let reused = lock_idle(&self.idle).pop();
        let browser = match reused {
            Some(browser) => browser,
            None => {
                debug!("Launching browser session");
                let browser = self.factory.launch().await?;
                let (width, height) = self.viewport;
                if let Err(e) = browser.set_viewport_size(width, height).await {
                    debug!("Viewport not applied: {}", e);
                }
                browser
            }
        };

        Ok(PooledBrowser {
            browser: Some(browser),
            idle: self.idle.clone(),
            broken: false,
            _permit: permit,
        })
    }

    /// Closes every idle session. Sessions still checked out are closed when
    /// they come back broken, or left to their owner.
    pub async fn shutdown(&self) {
        let sessions: Vec<Box<dyn Browser>> = lock_idle(&self.idle).drain(..).collect();
        for browser in sessions {
            if let Err(e) = browser.close().await {
                debug!("Error closing browser: {}", e);
            }
        }
        self.semaphore.close();
    }
}

fn lock_idle(idle: &IdleList) -> std::sync::MutexGuard<'_, Vec<Box<dyn Browser>>> {
    idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A checked-out session. Dereferences to the browser.
pub struct PooledBrowser {
    browser: Option<Box<dyn Browser>>,
    idle: IdleList,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledBrowser {
    /// The session must not be reused; it is closed on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn browser(&self) -> &dyn Browser {
        &**self
    }
}

impl Deref for PooledBrowser {
    type Target = dyn Browser;

    fn deref(&self) -> &Self::Target {
        match &self.browser {
            Some(browser) => browser.as_ref(),
            // Only taken in Drop
            None => unreachable!("pooled browser used after release"),
        }
    }
}

impl Drop for PooledBrowser {
    fn drop(&mut self) {
        let Some(browser) = self.browser.take() else {
            return;
        };
        if !self.broken {
            lock_idle(&self.idle).push(browser);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = browser.close().await {
                        debug!("Error closing broken browser: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime to close a broken browser session"),
        }
    }
}
