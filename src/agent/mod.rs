//! Page agent: the capture-side instrumentation that lives with the page.
//!
//! The agent answers the [`AgentRequest`] protocol. It knows nothing about
//! the capture loop; it only measures, scrolls and temporarily restyles the
//! page so each frame is safe and deterministic to capture.

pub mod redact;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::oneshot;

use crate::dom::{lock_page, ComputedStyle, Display, Document, NodeId, Position, SharedPage};
use crate::protocol::{AgentRequest, AgentResponse, PageMetrics, ScrollOutcome};
use crate::{Error, Result};

/// Id of the injected style override
pub const CAPTURE_STYLE_ID: &str = "fullgrab-capture-styles";

const CAPTURE_CSS: &str = r#"
::-webkit-scrollbar, *::-webkit-scrollbar {
  display: none !important;
  width: 0 !important;
  height: 0 !important;
  background: transparent !important;
}
body, html {
  -ms-overflow-style: none !important;
  scrollbar-width: none !important;
}
* {
  transition: none !important;
  animation: none !important;
  scroll-behavior: auto !important;
  scrollbar-width: none !important;
}
"#;

/// Inline visibility state snapshotted before hiding an element
#[derive(Debug, Clone, PartialEq)]
struct SavedVisibility {
    visibility: Option<String>,
    opacity: Option<String>,
}

/// Whether a fixed/sticky element is pinned to the top or bottom edge of the
/// viewport. Left/right-only sticky elements (frozen table columns) are not.
pub fn is_viewport_anchored(style: &ComputedStyle) -> bool {
    match style.position {
        Position::Fixed => {
            style.top.is_some()
                || style.bottom.is_some()
                || (style.left.is_none() && style.right.is_none())
        }
        Position::Sticky => style.top.is_some() || style.bottom.is_some(),
        _ => false,
    }
}

/// Elements to redact: sensitive form fields, free-text fields holding
/// sensitive values, and the nearest block around sensitive text.
pub fn sensitive_targets(doc: &Document) -> BTreeSet<NodeId> {
    let mut out = BTreeSet::new();
    for id in doc.body_elements() {
        let Some(el) = doc.element(id) else { continue };
        if redact::is_sensitive_field(el) {
            out.insert(id);
            continue;
        }
        if redact::is_free_text_field(el) {
            if let Some(value) = el.value.as_deref() {
                if redact::contains_sensitive_text(value) {
                    out.insert(id);
                }
            }
        }
    }
    // Match against the whole block so values split by inline markup are
    // still found. Runs are trimmed at parse time, so try both joins.
    let blocks: BTreeSet<NodeId> = doc
        .text_nodes()
        .into_iter()
        .filter_map(|id| doc.block_ancestor(id))
        .collect();
    for block in blocks {
        let runs = doc.inline_text_runs(block);
        if redact::contains_sensitive_text(&runs.join(" "))
            || redact::contains_sensitive_text(&runs.concat())
        {
            out.insert(block);
        }
    }
    out
}

/// `fullHeight`: the larger of the standard DOM height metrics and the
/// bottom-most element edge.
pub fn measure_full_height(doc: &Document) -> f64 {
    let standard = doc.height_metrics().standard_height();
    let scroll_y = doc.scroll_y();
    doc.body_elements()
        .into_iter()
        .filter(|id| doc.element(*id).is_some_and(|e| e.style.display != Display::None))
        .filter_map(|id| doc.bounding_client_rect(id))
        .map(|r| r.bottom() + scroll_y)
        .fold(standard, f64::max)
}

pub struct PageAgent {
    page: SharedPage,
    settle: Duration,
    /// Fixed/sticky chrome, collected once per capture
    chrome: BTreeMap<NodeId, SavedVisibility>,
    collected: bool,
    /// Redacted elements and their original inline `filter`
    redacted: BTreeMap<NodeId, Option<String>>,
}

impl PageAgent {
    pub fn new(page: SharedPage, settle: Duration) -> Self {
        Self {
            page,
            settle,
            chrome: BTreeMap::new(),
            collected: false,
            redacted: BTreeMap::new(),
        }
    }

    pub fn handle(&mut self, request: AgentRequest) -> Result<AgentResponse> {
        match request {
            AgentRequest::Ping => Ok(AgentResponse::Pong),
            AgentRequest::PrepareCapture => {
                self.prepare()?;
                Ok(AgentResponse::Ack)
            }
            AgentRequest::GetPageInfo => Ok(AgentResponse::PageInfo(self.page_info()?)),
            AgentRequest::ScrollTo { y } => Ok(AgentResponse::Scrolled(self.scroll_to(y)?)),
            AgentRequest::FinishCapture { original_scroll_y } => {
                self.finish(original_scroll_y)?;
                Ok(AgentResponse::Ack)
            }
        }
    }

    /// Elements currently tracked as fixed/sticky chrome.
    pub fn chrome_elements(&self) -> Vec<NodeId> {
        self.chrome.keys().copied().collect()
    }

    pub fn redacted_elements(&self) -> Vec<NodeId> {
        self.redacted.keys().copied().collect()
    }

    fn prepare(&mut self) -> Result<()> {
        let mut doc = lock_page(&self.page)?;
        if !doc.has_style_sheet(CAPTURE_STYLE_ID) {
            doc.insert_style_sheet(CAPTURE_STYLE_ID, CAPTURE_CSS);
        }

        if !self.collected {
            self.collected = true;
            for id in doc.body_elements() {
                let Some(el) = doc.element(id) else { continue };
                if !is_viewport_anchored(&el.style) || el.is_invisible() {
                    continue;
                }
                self.chrome.insert(
                    id,
                    SavedVisibility {
                        visibility: el.inline.get("visibility").cloned(),
                        opacity: el.inline.get("opacity").cloned(),
                    },
                );
            }
            debug!("collected {} fixed/sticky elements", self.chrome.len());
        }

        for id in sensitive_targets(&doc) {
            if self.redacted.contains_key(&id) {
                continue;
            }
            let original = doc.inline_style(id, "filter").map(|s| s.to_string());
            doc.set_inline_style(id, "filter", Some(redact::REDACTION_FILTER.to_string()));
            self.redacted.insert(id, original);
        }
        Ok(())
    }

    fn page_info(&self) -> Result<PageMetrics> {
        let doc = lock_page(&self.page)?;
        Ok(PageMetrics {
            full_height: measure_full_height(&doc),
            client_height: doc.client_height(),
            device_pixel_ratio: doc.device_pixel_ratio(),
            original_scroll_y: doc.scroll_y(),
            width: doc.client_width(),
        })
    }

    fn scroll_to(&mut self, y: f64) -> Result<ScrollOutcome> {
        {
            let mut doc = lock_page(&self.page)?;
            self.set_chrome_hidden(&mut doc, y > 0.0);
            doc.scroll_to(y);
        }
        thread::sleep(self.settle);
        let doc = lock_page(&self.page)?;
        Ok(ScrollOutcome {
            current_scroll_y: doc.scroll_y(),
            new_scroll_height: doc.height_metrics().html_scroll_height,
        })
    }

    fn set_chrome_hidden(&self, doc: &mut Document, hide: bool) {
        for (id, saved) in &self.chrome {
            if hide {
                doc.set_inline_style(*id, "visibility", Some("hidden".into()));
                doc.set_inline_style(*id, "opacity", Some("0".into()));
            } else {
                doc.set_inline_style(*id, "visibility", saved.visibility.clone());
                doc.set_inline_style(*id, "opacity", saved.opacity.clone());
            }
        }
    }

    fn finish(&mut self, original_scroll_y: Option<f64>) -> Result<()> {
        let mut doc = lock_page(&self.page)?;
        doc.remove_style_sheet(CAPTURE_STYLE_ID);
        self.set_chrome_hidden(&mut doc, false);
        self.chrome.clear();
        self.collected = false;
        for (id, original) in std::mem::take(&mut self.redacted) {
            doc.set_inline_style(id, "filter", original);
        }
        if let Some(y) = original_scroll_y {
            doc.scroll_to(y);
        }
        Ok(())
    }
}

type Job = (AgentRequest, oneshot::Sender<Result<AgentResponse>>);

/// Message channel to a page agent running on its own worker thread.
///
/// The worker owns the `PageAgent`; callers only exchange messages with it.
#[derive(Clone)]
pub struct AgentHandle {
    tx: Sender<Job>,
}

impl AgentHandle {
    /// Spawn an agent for `page`. The worker exits once every handle is dropped.
    pub fn spawn(page: SharedPage, settle: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("fullgrab-agent".into())
            .spawn(move || {
                let mut agent = PageAgent::new(page, settle);
                while let Ok((request, resp)) = rx.recv() {
                    let name = request.name();
                    let res = agent.handle(request);
                    if let Err(e) = &res {
                        warn!("agent failed to handle {}: {}", name, e);
                    }
                    let _ = resp.send(res);
                }
            })
            .map_err(|e| Error::InjectionFailed(format!("failed to start agent: {}", e)))?;
        Ok(Self { tx })
    }

    pub async fn request(&self, request: AgentRequest) -> Result<AgentResponse> {
        let (tx, rx) = oneshot::channel();
        let name = request.name();
        self.tx
            .send((request, tx))
            .map_err(|_| Error::AgentError(format!("{}: agent is gone", name)))?;
        rx.await
            .map_err(|e| Error::AgentError(format!("{} canceled: {}", name, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementData;
    use crate::Viewport;
    use std::sync::{Arc, Mutex};

    fn page() -> (SharedPage, NodeId, NodeId) {
        let mut doc = Document::new(Viewport { width: 300, height: 200 }, 1.0);
        let body = doc.body();
        let header = doc.append_element(
            body,
            ElementData::new(
                "header",
                ComputedStyle {
                    position: Position::Fixed,
                    top: Some(0.0),
                    height: Some(30.0),
                    ..Default::default()
                },
            ),
        );
        let column = doc.append_element(
            body,
            ElementData::new(
                "td",
                ComputedStyle {
                    position: Position::Sticky,
                    left: Some(0.0),
                    height: Some(30.0),
                    ..Default::default()
                },
            ),
        );
        doc.append_element(
            body,
            ElementData::new("div", ComputedStyle { height: Some(1000.0), ..Default::default() }),
        );
        doc.layout();
        (Arc::new(Mutex::new(doc)), header, column)
    }

    #[test]
    fn left_sticky_columns_are_not_collected() {
        let (page, header, column) = page();
        let mut agent = PageAgent::new(page, Duration::ZERO);
        agent.handle(AgentRequest::PrepareCapture).unwrap();
        assert_eq!(agent.chrome_elements(), vec![header]);
        assert!(!agent.chrome_elements().contains(&column));
    }

    #[test]
    fn chrome_hidden_when_scrolled_and_restored_at_top() {
        let (page, header, _) = page();
        let mut agent = PageAgent::new(page.clone(), Duration::ZERO);
        agent.handle(AgentRequest::PrepareCapture).unwrap();

        agent.handle(AgentRequest::ScrollTo { y: 100.0 }).unwrap();
        assert_eq!(page.lock().unwrap().inline_style(header, "visibility"), Some("hidden"));

        agent.handle(AgentRequest::ScrollTo { y: 0.0 }).unwrap();
        assert_eq!(page.lock().unwrap().inline_style(header, "visibility"), None);
    }

    #[test]
    fn scroll_reports_actual_position() {
        let (page, _, _) = page();
        let mut agent = PageAgent::new(page, Duration::ZERO);
        let reply = agent.handle(AgentRequest::ScrollTo { y: 5000.0 }).unwrap();
        assert_eq!(
            reply,
            AgentResponse::Scrolled(ScrollOutcome {
                current_scroll_y: 830.0,
                new_scroll_height: 1030.0,
            })
        );
    }

    #[test]
    fn viewport_anchoring() {
        let fixed_default = ComputedStyle { position: Position::Fixed, ..Default::default() };
        assert!(is_viewport_anchored(&fixed_default));
        let fixed_side = ComputedStyle {
            position: Position::Fixed,
            right: Some(0.0),
            ..Default::default()
        };
        assert!(!is_viewport_anchored(&fixed_side));
        let sticky_bottom = ComputedStyle {
            position: Position::Sticky,
            bottom: Some(0.0),
            ..Default::default()
        };
        assert!(is_viewport_anchored(&sticky_bottom));
        assert!(!is_viewport_anchored(&ComputedStyle::default()));
    }

    #[tokio::test]
    async fn handle_round_trips_through_worker() {
        let (page, _, _) = page();
        let handle = AgentHandle::spawn(page, Duration::ZERO).unwrap();
        assert_eq!(handle.request(AgentRequest::Ping).await.unwrap(), AgentResponse::Pong);
        match handle.request(AgentRequest::GetPageInfo).await.unwrap() {
            AgentResponse::PageInfo(m) => {
                // 30px sticky cell + 1000px block
                assert_eq!(m.full_height, 1030.0);
                assert_eq!(m.client_height, 200.0);
                assert_eq!(m.width, 300.0);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
