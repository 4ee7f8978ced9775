//! Capture orchestrator
//!
//! Drives one capture session per user action:
//!
//! ```text
//! Idle -> EnsuringAgent -> Preparing -> Scrolling <-> Capturing
//!      -> Restoring -> Compositing -> Done | Failed
//! ```
//!
//! Every step is sequential. Once the agent is present, the page is restored
//! on every exit path before an error is surfaced.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::compositor::CompositorHandle;
use crate::host::{Host, TabId, TabInfo};
use crate::protocol::{AgentRequest, AgentResponse, Frame, PageMetrics, ScrollOutcome, StitchRequest};
use crate::storage::{CaptureRecord, Store};
use crate::{CaptureConfig, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    EnsuringAgent,
    Preparing,
    Scrolling,
    Capturing,
    Restoring,
    Compositing,
    Done,
    Failed,
}

/// Outcome of the agent presence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The agent answered. `attempts` counts pings sent after injection;
    /// zero means it was already there.
    Ready { attempts: u32 },
    /// Injected, but every retry went unanswered
    Exhausted { attempts: u32 },
}

/// Why the scroll/capture loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The last frame reaches the measured bottom of the page
    ReachedBottom,
    /// The absolute tile limit was hit; coverage may be partial
    SafetyLimit,
    /// The page did not scroll past the previous frame
    Stuck,
    /// The clamped next offset is already inside the last frame
    Covered,
}

/// Result of a finished capture
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Final PNG
    pub image: Vec<u8>,
    pub frames: Vec<Frame>,
    /// `None` for single-viewport captures
    pub termination: Option<Termination>,
    pub page_title: String,
    pub page_url: String,
    pub states: Vec<SessionState>,
}

struct Session {
    tab: TabInfo,
    states: Vec<SessionState>,
}

impl Session {
    fn new(tab: TabInfo) -> Self {
        Self {
            tab,
            states: vec![SessionState::Idle],
        }
    }

    fn enter(&mut self, state: SessionState) {
        let from = self.states.last().copied().unwrap_or(SessionState::Idle);
        if from != state {
            info!("tab {}: {:?} -> {:?}", self.tab.id.0, from, state);
        }
        self.states.push(state);
    }
}

/// Marks a tab busy for as long as it lives
struct SessionGuard<'a> {
    active: &'a Mutex<HashSet<TabId>>,
    tab: TabId,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.tab);
        }
    }
}

struct Scan {
    metrics: PageMetrics,
    frames: Vec<Frame>,
    termination: Termination,
}

pub struct Orchestrator<H: Host, S: Store> {
    host: Arc<H>,
    store: Arc<S>,
    config: CaptureConfig,
    compositor: CompositorHandle,
    active: Mutex<HashSet<TabId>>,
}

impl<H: Host, S: Store> Orchestrator<H, S> {
    /// Validates `config` and attaches to the shared compositor.
    pub fn new(host: Arc<H>, store: Arc<S>, config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            host,
            store,
            config,
            compositor: CompositorHandle::shared()?.clone(),
            active: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn acquire(&self, tab: TabId) -> Result<SessionGuard<'_>> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| Error::Other("session table lock poisoned".into()))?;
        if !active.insert(tab) {
            return Err(Error::CaptureInProgress(tab.0));
        }
        Ok(SessionGuard { active: &self.active, tab })
    }

    async fn ping(&self, tab: TabId) -> bool {
        matches!(
            self.host.send_message(tab, AgentRequest::Ping).await,
            Ok(AgentResponse::Pong)
        )
    }

    /// Make sure a page agent answers in `tab`, injecting one if needed.
    ///
    /// Injection errors are returned as-is. Exhausting the ping budget is
    /// reported as [`Presence::Exhausted`], not as an error.
    pub async fn ensure_agent(&self, tab: TabId) -> Result<Presence> {
        if self.ping(tab).await {
            return Ok(Presence::Ready { attempts: 0 });
        }
        info!("no agent in tab {}, injecting", tab.0);
        self.host.inject_agent(tab).await.map_err(|e| match e {
            Error::InjectionFailed(_) => e,
            other => Error::InjectionFailed(other.to_string()),
        })?;
        tokio::time::sleep(self.config.inject_settle()).await;

        let attempts = self.config.ping_attempts;
        for attempt in 1..=attempts {
            if self.ping(tab).await {
                return Ok(Presence::Ready { attempts: attempt });
            }
            debug!("ping {}/{} to tab {} unanswered", attempt, attempts, tab.0);
            if attempt < attempts {
                tokio::time::sleep(self.config.ping_backoff()).await;
            }
        }
        Ok(Presence::Exhausted { attempts })
    }

    async fn page_info(&self, tab: TabId) -> Result<PageMetrics> {
        match self.host.send_message(tab, AgentRequest::GetPageInfo).await? {
            AgentResponse::PageInfo(m) => Ok(m),
            other => Err(unexpected("GET_PAGE_INFO", &other)),
        }
    }

    async fn scroll_to(&self, tab: TabId, y: f64) -> Result<ScrollOutcome> {
        match self.host.send_message(tab, AgentRequest::ScrollTo { y }).await? {
            AgentResponse::Scrolled(s) => Ok(s),
            other => Err(unexpected("SCROLL_TO", &other)),
        }
    }

    async fn restore(&self, tab: TabId, original_scroll_y: Option<f64>) {
        let req = AgentRequest::FinishCapture { original_scroll_y };
        match self.host.send_message(tab, req).await {
            Ok(AgentResponse::Ack) => {}
            Ok(other) => warn!("restore of tab {} got {:?}", tab.0, other),
            Err(e) => warn!("failed to restore tab {}: {}", tab.0, e),
        }
    }

    /// Capture the whole page in the active tab as one stitched image.
    pub async fn capture_full_page(&self) -> Result<CaptureReport> {
        let tab = self.host.active_tab().await?;
        let _guard = self.acquire(tab.id)?;
        let mut session = Session::new(tab);
        match self.run_full_page(&mut session).await {
            Ok(report) => Ok(report),
            Err(e) => {
                session.enter(SessionState::Failed);
                warn!("capture of tab {} failed: {}", session.tab.id.0, e);
                Err(e)
            }
        }
    }

    async fn run_full_page(&self, session: &mut Session) -> Result<CaptureReport> {
        let tab = session.tab.id;
        session.enter(SessionState::EnsuringAgent);
        if let Presence::Exhausted { attempts } = self.ensure_agent(tab).await? {
            return Err(Error::AgentUnreachable { attempts });
        }

        let mut original_scroll_y = None;
        let scanned = self.scan(session, &mut original_scroll_y).await;
        session.enter(SessionState::Restoring);
        self.restore(tab, original_scroll_y).await;
        let scan = scanned?;

        session.enter(SessionState::Compositing);
        let last_offset = scan
            .frames
            .last()
            .map(|f| f.captured_at_scroll_y)
            .ok_or_else(|| Error::Other("capture produced no frames".into()))?;
        let request = StitchRequest {
            frames: scan.frames.clone(),
            viewport_width: scan.metrics.width,
            viewport_height: scan.metrics.client_height,
            total_height: last_offset + scan.metrics.client_height,
            device_pixel_ratio: scan.metrics.device_pixel_ratio,
        };
        let stitched = match self.compositor.stitch(request).await {
            Ok(img) => img,
            Err(e) => {
                // keep the raw frames so nothing is lost
                let record = CaptureRecord::new(None, &scan.frames, &session.tab.title, &session.tab.url);
                if let Err(store_err) = self.store.replace(&record) {
                    warn!("failed to persist frames: {}", store_err);
                }
                return Err(e);
            }
        };
        info!(
            "stitched {} frames into {}x{} ({:?})",
            scan.frames.len(),
            stitched.width,
            stitched.height,
            scan.termination
        );

        let record = CaptureRecord::new(Some(&stitched.png), &scan.frames, &session.tab.title, &session.tab.url);
        self.store.replace(&record)?;
        session.enter(SessionState::Done);
        Ok(CaptureReport {
            image: stitched.png,
            frames: scan.frames,
            termination: Some(scan.termination),
            page_title: session.tab.title.clone(),
            page_url: session.tab.url.clone(),
            states: session.states.clone(),
        })
    }

    /// Prepare the page and run the scroll/capture loop.
    async fn scan(&self, session: &mut Session, original_scroll_y: &mut Option<f64>) -> Result<Scan> {
        let tab = session.tab.id;
        let window = session.tab.window_id;

        session.enter(SessionState::Preparing);
        match self.host.send_message(tab, AgentRequest::PrepareCapture).await? {
            AgentResponse::Ack => {}
            other => return Err(unexpected("PREPARE_CAPTURE", &other)),
        }
        let metrics = self.page_info(tab).await?;
        *original_scroll_y = Some(metrics.original_scroll_y);

        let client_height = metrics.client_height;
        if client_height.is_nan() || client_height <= 0.0 {
            return Err(Error::AgentError(format!("invalid client height {}", client_height)));
        }
        let max_scroll = metrics.full_height.min(client_height * self.config.max_screens as f64);
        let last_start = (max_scroll - client_height).max(0.0);
        let step = client_height - self.config.overlap;
        debug!(
            "page {}x{} (full height {}), step {}, max scroll {}",
            metrics.width, client_height, metrics.full_height, step, max_scroll
        );

        let mut frames: Vec<Frame> = Vec::new();
        let mut y = 0.0;
        let termination = loop {
            session.enter(SessionState::Scrolling);
            let outcome = self.scroll_to(tab, y).await?;
            let real_y = outcome.current_scroll_y;
            if frames.last().is_some_and(|prev| real_y <= prev.captured_at_scroll_y) {
                debug!("scroll to {} stayed at {}", y, real_y);
                break Termination::Stuck;
            }

            session.enter(SessionState::Capturing);
            tokio::time::sleep(self.config.render_settle()).await;
            let image = self.host.capture_visible_tab(window).await.map_err(|e| match e {
                Error::CaptureDeviceError(_) => e,
                other => Error::CaptureDeviceError(other.to_string()),
            })?;
            debug!("tile {} at y={} ({} bytes)", frames.len(), real_y, image.len());
            frames.push(Frame { image, captured_at_scroll_y: real_y });

            if real_y + client_height >= outcome.new_scroll_height {
                break Termination::ReachedBottom;
            }
            if frames.len() >= self.config.max_tiles {
                warn!(
                    "safety limit of {} tiles reached at y={}, capture may be partial",
                    self.config.max_tiles, real_y
                );
                break Termination::SafetyLimit;
            }

            let wanted = y + step;
            // only a clamped offset can already be covered
            if wanted > last_start && last_start <= real_y {
                break Termination::Covered;
            }
            y = wanted.min(last_start);
        };

        Ok(Scan { metrics, frames, termination })
    }

    /// Capture only the visible viewport of the active tab. No agent needed.
    pub async fn capture_visible(&self) -> Result<CaptureReport> {
        let tab = self.host.active_tab().await?;
        let _guard = self.acquire(tab.id)?;
        let mut session = Session::new(tab);
        session.enter(SessionState::Capturing);

        let image = match self.host.capture_visible_tab(session.tab.window_id).await {
            Ok(image) => image,
            Err(e) => {
                session.enter(SessionState::Failed);
                return Err(e);
            }
        };
        let frames = vec![Frame { image: image.clone(), captured_at_scroll_y: 0.0 }];
        let record = CaptureRecord::new(Some(&image), &frames, &session.tab.title, &session.tab.url);
        self.store.replace(&record)?;
        session.enter(SessionState::Done);
        Ok(CaptureReport {
            image,
            frames,
            termination: None,
            page_title: session.tab.title.clone(),
            page_url: session.tab.url.clone(),
            states: session.states,
        })
    }
}

fn unexpected(request: &str, reply: &AgentResponse) -> Error {
    Error::Protocol(format!("unexpected reply to {}: {:?}", request, reply))
}
