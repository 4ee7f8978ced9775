//! Host environment primitives: tab lookup, agent injection, messaging and
//! visible-tab screenshots.
//!
//! [`Host`] is the seam the orchestrator depends on. [`LocalHost`] is an
//! in-process host whose tabs hold [`Document`] pages and whose screenshots
//! come from the [`rendering`](crate::rendering) module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use crate::agent::AgentHandle;
use crate::dom::{lock_page, Document, SharedPage};
use crate::protocol::{AgentRequest, AgentResponse};
use crate::rendering;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u32);

/// Metadata of a browser tab
#[derive(Debug, Clone, PartialEq)]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    pub title: String,
    pub url: String,
}

/// Primitives the orchestrator needs from the browser host
#[async_trait]
pub trait Host: Send + Sync {
    /// The tab the user acted on
    async fn active_tab(&self) -> Result<TabInfo>;

    /// Send a request to the page agent of `tab`. Fails if no agent listens.
    async fn send_message(&self, tab: TabId, request: AgentRequest) -> Result<AgentResponse>;

    /// Inject the page agent into `tab`
    async fn inject_agent(&self, tab: TabId) -> Result<()>;

    /// PNG screenshot of the visible area of the active tab in `window`
    async fn capture_visible_tab(&self, window: WindowId) -> Result<Vec<u8>>;
}

/// URL schemes whose pages refuse script injection
const PROTECTED_SCHEMES: &[&str] = &["chrome:", "chrome-extension:", "about:", "edge:", "view-source:"];

pub fn is_protected_url(url: &str) -> bool {
    PROTECTED_SCHEMES.iter().any(|s| url.starts_with(s))
}

struct TabEntry {
    info: TabInfo,
    page: SharedPage,
    agent: Option<AgentHandle>,
}

/// In-process host. Each tab owns a page; injecting the agent spawns a
/// worker bound to that page.
pub struct LocalHost {
    tabs: Mutex<HashMap<TabId, TabEntry>>,
    active: Mutex<Option<TabId>>,
    next_id: AtomicU32,
    window: WindowId,
    agent_settle: Duration,
}

impl LocalHost {
    /// `agent_settle` is the settle delay injected agents wait after scrolling.
    pub fn new(agent_settle: Duration) -> Self {
        Self {
            tabs: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            next_id: AtomicU32::new(1),
            window: WindowId(1),
            agent_settle,
        }
    }

    fn tabs(&self) -> Result<MutexGuard<'_, HashMap<TabId, TabEntry>>> {
        self.tabs
            .lock()
            .map_err(|_| Error::Other("tab table lock poisoned".into()))
    }

    /// Open `doc` in a new tab and make it active.
    pub fn open_tab(&self, doc: Document, url: &str) -> Result<TabId> {
        let id = TabId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let info = TabInfo {
            id,
            window_id: self.window,
            title: doc.title().to_string(),
            url: url.to_string(),
        };
        let entry = TabEntry {
            info,
            page: Arc::new(Mutex::new(doc)),
            agent: None,
        };
        self.tabs()?.insert(id, entry);
        *self
            .active
            .lock()
            .map_err(|_| Error::Other("active tab lock poisoned".into()))? = Some(id);
        Ok(id)
    }

    /// The live page of `tab`, for inspection.
    pub fn page(&self, tab: TabId) -> Option<SharedPage> {
        self.tabs.lock().ok()?.get(&tab).map(|t| t.page.clone())
    }

    pub fn has_agent(&self, tab: TabId) -> bool {
        self.tabs
            .lock()
            .map(|tabs| tabs.get(&tab).is_some_and(|t| t.agent.is_some()))
            .unwrap_or(false)
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        *self.active.lock().ok()?
    }

    fn active_id(&self) -> Result<TabId> {
        self.active_tab_id()
            .ok_or_else(|| Error::Other("no active tab".into()))
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn active_tab(&self) -> Result<TabInfo> {
        let id = self.active_id()?;
        let tabs = self.tabs()?;
        tabs.get(&id)
            .map(|t| t.info.clone())
            .ok_or_else(|| Error::Other(format!("tab {} is closed", id.0)))
    }

    async fn send_message(&self, tab: TabId, request: AgentRequest) -> Result<AgentResponse> {
        let agent = {
            let tabs = self.tabs()?;
            let entry = tabs
                .get(&tab)
                .ok_or_else(|| Error::AgentError(format!("no tab with id {}", tab.0)))?;
            entry.agent.clone().ok_or_else(|| {
                Error::AgentError("could not establish connection: receiving end does not exist".into())
            })?
        };
        agent.request(request).await
    }

    async fn inject_agent(&self, tab: TabId) -> Result<()> {
        let mut tabs = self.tabs()?;
        let entry = tabs
            .get_mut(&tab)
            .ok_or_else(|| Error::InjectionFailed(format!("no tab with id {}", tab.0)))?;
        if is_protected_url(&entry.info.url) {
            return Err(Error::InjectionFailed(format!(
                "cannot script protected page {}",
                entry.info.url
            )));
        }
        if entry.agent.is_none() {
            info!("injecting page agent into tab {}", tab.0);
            entry.agent = Some(AgentHandle::spawn(entry.page.clone(), self.agent_settle)?);
        }
        Ok(())
    }

    async fn capture_visible_tab(&self, window: WindowId) -> Result<Vec<u8>> {
        if window != self.window {
            return Err(Error::CaptureDeviceError(format!("no window with id {}", window.0)));
        }
        let id = self.active_id()?;
        let page = self
            .page(id)
            .ok_or_else(|| Error::CaptureDeviceError(format!("tab {} is closed", id.0)))?;
        let shot = tokio::task::spawn_blocking(move || -> Result<rendering::Screenshot> {
            let doc = lock_page(&page)?;
            rendering::render_viewport(&doc)
        })
        .await
        .map_err(|e| Error::CaptureDeviceError(format!("capture task failed: {}", e)))?
        .map_err(|e| Error::CaptureDeviceError(e.to_string()))?;
        debug!("captured {}x{} viewport of tab {}", shot.width, shot.height, id.0);
        Ok(shot.png_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Viewport;

    fn doc() -> Document {
        let mut d = Document::new(Viewport { width: 64, height: 48 }, 2.0);
        d.set_title("Tiny");
        d.layout();
        d
    }

    #[tokio::test]
    async fn messages_fail_until_agent_injected() {
        let host = LocalHost::new(Duration::ZERO);
        let tab = host.open_tab(doc(), "https://example.com/").unwrap();
        assert!(host.send_message(tab, AgentRequest::Ping).await.is_err());

        host.inject_agent(tab).await.unwrap();
        assert!(host.has_agent(tab));
        let reply = host.send_message(tab, AgentRequest::Ping).await.unwrap();
        assert_eq!(reply, AgentResponse::Pong);
    }

    #[tokio::test]
    async fn protected_pages_refuse_injection() {
        let host = LocalHost::new(Duration::ZERO);
        let tab = host.open_tab(doc(), "chrome://settings").unwrap();
        let err = host.inject_agent(tab).await.unwrap_err();
        assert!(matches!(err, Error::InjectionFailed(_)));
    }

    #[tokio::test]
    async fn screenshot_is_in_device_pixels() {
        let host = LocalHost::new(Duration::ZERO);
        let tab = host.open_tab(doc(), "https://example.com/").unwrap();
        let info = host.active_tab().await.unwrap();
        assert_eq!(info.id, tab);
        assert_eq!(info.title, "Tiny");

        let png = host.capture_visible_tab(info.window_id).await.unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (128, 96));
    }

    #[test]
    fn poisoned_tab_table_fails_to_open() {
        let host = Arc::new(LocalHost::new(Duration::ZERO));
        let poisoner = host.clone();
        let _ = std::thread::spawn(move || {
            let _tabs = poisoner.tabs.lock().unwrap();
            panic!("poison the tab table");
        })
        .join();

        assert!(host.open_tab(doc(), "https://example.com/").is_err());
        assert_eq!(host.active_tab_id(), None);
    }
}
