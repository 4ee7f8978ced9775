//! In-process page model
//!
//! A `Document` is an arena of nodes addressed by stable `NodeId` handles.
//! The page agent keys its bookkeeping (collected fixed elements, redacted
//! blocks) by `NodeId` instead of by reference, and the host renderer reads
//! the same arena to produce viewport screenshots.

pub mod html;
pub mod layout;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Error, Result, Viewport};

/// A page shared between the host (which renders it) and the page agent
/// (which scrolls and restyles it).
pub type SharedPage = Arc<Mutex<Document>>;

/// Lock a shared page, mapping lock poisoning into a pipeline error.
pub fn lock_page(page: &SharedPage) -> Result<MutexGuard<'_, Document>> {
    page.lock()
        .map_err(|_| Error::Other("page lock poisoned".into()))
}

/// Stable handle to a node in a `Document` arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Display {
    #[default]
    Block,
    Inline,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

/// RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

impl Rgba {
    pub const WHITE: Rgba = Rgba(255, 255, 255, 255);
    pub const BLACK: Rgba = Rgba(0, 0, 0, 255);
}

/// The subset of computed style the pipeline cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display: Display,
    pub position: Position,
    pub top: Option<f64>,
    pub bottom: Option<f64>,
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub hidden: bool,
    pub opacity: f64,
    pub background: Option<Rgba>,
    pub color: Rgba,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            position: Position::Static,
            top: None,
            bottom: None,
            left: None,
            right: None,
            width: None,
            height: None,
            hidden: false,
            opacity: 1.0,
            background: None,
            color: Rgba::BLACK,
        }
    }
}

impl ComputedStyle {
    pub fn inline() -> Self {
        Self {
            display: Display::Inline,
            ..Default::default()
        }
    }
}

/// Axis-aligned rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub style: ComputedStyle,
    /// Inline style overrides (`element.style`), written by the page agent
    pub inline: BTreeMap<String, String>,
    /// Current value of a form control
    pub value: Option<String>,
}

impl ElementData {
    pub fn new(tag: &str, style: ComputedStyle) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            style,
            inline: BTreeMap::new(),
            value: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn is_form_field(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
    }

    /// Whether the element is invisible through its inline overrides or its
    /// computed style.
    pub fn is_invisible(&self) -> bool {
        if self.style.display == Display::None {
            return true;
        }
        let hidden = match self.inline.get("visibility") {
            Some(v) => v == "hidden",
            None => self.style.hidden,
        };
        let transparent = match self.inline.get("opacity") {
            Some(v) => v.trim().parse::<f64>().map(|o| o <= 0.0).unwrap_or(false),
            None => self.style.opacity <= 0.0,
        };
        hidden || transparent
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    /// Layout box. Document coordinates, or viewport coordinates inside a
    /// `fixed` subtree.
    pub rect: Rect,
}

/// An injected `<style>` element
#[derive(Debug, Clone)]
pub struct StyleSheet {
    pub id: String,
    pub css: String,
}

/// Infinite-scroll emulation: appends content as the viewport nears the end.
#[derive(Debug, Clone)]
pub struct LazyLoad {
    /// Distance from the content bottom that triggers a load
    pub trigger_distance: f64,
    pub block_height: f64,
    pub blocks_per_load: usize,
    pub max_loads: usize,
    pub loads: usize,
}

/// Raw DOM height measurements, mirroring the browser properties of the same
/// names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightMetrics {
    pub body_scroll_height: f64,
    pub body_offset_height: f64,
    pub html_client_height: f64,
    pub html_scroll_height: f64,
    pub html_offset_height: f64,
}

impl HeightMetrics {
    pub fn standard_height(&self) -> f64 {
        [
            self.body_scroll_height,
            self.body_offset_height,
            self.html_client_height,
            self.html_scroll_height,
            self.html_offset_height,
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    html: NodeId,
    body: NodeId,
    viewport: Viewport,
    device_pixel_ratio: f64,
    scroll_y: f64,
    style_sheets: Vec<StyleSheet>,
    lazy: Option<LazyLoad>,
    title: String,
    /// Bottom of in-flow content, refreshed by layout
    content_height: f64,
}

impl Document {
    pub fn new(viewport: Viewport, device_pixel_ratio: f64) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            html: NodeId(0),
            body: NodeId(1),
            viewport,
            device_pixel_ratio,
            scroll_y: 0.0,
            style_sheets: Vec::new(),
            lazy: None,
            title: String::new(),
            content_height: 0.0,
        };
        doc.push_node(None, NodeKind::Element(ElementData::new("html", ComputedStyle::default())));
        doc.push_node(
            Some(doc.html),
            NodeKind::Element(ElementData::new("body", ComputedStyle::default())),
        );
        doc
    }

    fn push_node(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            kind,
            rect: Rect::default(),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    pub fn html(&self) -> NodeId {
        self.html
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn client_height(&self) -> f64 {
        self.viewport.height as f64
    }

    pub fn client_width(&self) -> f64 {
        self.viewport.width as f64
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    pub fn append_element(&mut self, parent: NodeId, data: ElementData) -> NodeId {
        self.push_node(Some(parent), NodeKind::Element(data))
    }

    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        self.push_node(Some(parent), NodeKind::Text(text.into()))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Pre-order walk of the subtree rooted at `root` (excluding `root`).
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Every element under `<body>`, in tree order.
    pub fn body_elements(&self) -> Vec<NodeId> {
        self.descendants(self.body)
            .into_iter()
            .filter(|id| self.element(*id).is_some())
            .collect()
    }

    pub fn text_nodes(&self) -> Vec<NodeId> {
        self.descendants(self.body)
            .into_iter()
            .filter(|id| self.text(*id).is_some())
            .collect()
    }

    /// Closest ancestor element of `id` whose display is not inline.
    pub fn block_ancestor(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if let Some(el) = self.element(p) {
                if el.style.display != Display::Inline {
                    return Some(p);
                }
            }
            cur = self.parent(p);
        }
        None
    }

    /// Text runs flowing inside `block`, in tree order. Descends through
    /// inline elements only; nested blocks keep their own text.
    pub fn inline_text_runs(&self, block: NodeId) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(block).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(text) = self.text(id) {
                out.push(text);
            } else if self.element(id).is_some_and(|e| e.style.display == Display::Inline) {
                stack.extend(self.children(id).iter().rev().copied());
            }
        }
        out
    }

    pub fn inline_style(&self, id: NodeId, prop: &str) -> Option<&str> {
        self.element(id)
            .and_then(|e| e.inline.get(prop))
            .map(|s| s.as_str())
    }

    /// Set (`Some`) or remove (`None`) an inline style property.
    pub fn set_inline_style(&mut self, id: NodeId, prop: &str, value: Option<String>) {
        if let Some(el) = self.element_mut(id) {
            match value {
                Some(v) => {
                    el.inline.insert(prop.to_string(), v);
                }
                None => {
                    el.inline.remove(prop);
                }
            }
        }
    }

    pub fn style_sheets(&self) -> &[StyleSheet] {
        &self.style_sheets
    }

    pub fn has_style_sheet(&self, id: &str) -> bool {
        self.style_sheets.iter().any(|s| s.id == id)
    }

    pub fn insert_style_sheet(&mut self, id: &str, css: &str) {
        self.style_sheets.push(StyleSheet {
            id: id.to_string(),
            css: css.to_string(),
        });
    }

    /// Remove an injected sheet; returns whether one was present.
    pub fn remove_style_sheet(&mut self, id: &str) -> bool {
        let before = self.style_sheets.len();
        self.style_sheets.retain(|s| s.id != id);
        before != self.style_sheets.len()
    }

    pub fn scrollbars_hidden(&self) -> bool {
        self.style_sheets
            .iter()
            .any(|s| s.css.contains("scrollbar-width: none") || s.css.contains("::-webkit-scrollbar"))
    }

    pub fn set_lazy_load(&mut self, lazy: LazyLoad) {
        self.lazy = Some(lazy);
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    pub fn max_scroll(&self) -> f64 {
        (self.height_metrics().html_scroll_height - self.client_height()).max(0.0)
    }

    /// Instantly scroll to `y`, clamped to the scrollable range. Returns the
    /// resulting scroll position.
    pub fn scroll_to(&mut self, y: f64) -> f64 {
        self.scroll_y = y.clamp(0.0, self.max_scroll());
        self.maybe_lazy_load();
        self.scroll_y
    }

    fn maybe_lazy_load(&mut self) {
        let viewport_bottom = self.scroll_y + self.client_height();
        let Some(lazy) = self.lazy.as_mut() else {
            return;
        };
        if lazy.loads >= lazy.max_loads
            || viewport_bottom + lazy.trigger_distance < self.content_height
        {
            return;
        }
        lazy.loads += 1;
        let (count, height, round) = (lazy.blocks_per_load, lazy.block_height, lazy.loads);
        let body = self.body;
        for i in 0..count {
            let shade = if (round + i) % 2 == 0 { 230 } else { 200 };
            let style = ComputedStyle {
                height: Some(height),
                background: Some(Rgba(shade, shade, 255, 255)),
                ..Default::default()
            };
            self.append_element(body, ElementData::new("div", style));
        }
        self.layout();
    }

    /// Recompute layout boxes for the whole tree.
    pub fn layout(&mut self) {
        self.content_height = layout::layout_document(self);
    }

    pub fn content_height(&self) -> f64 {
        self.content_height
    }

    pub(crate) fn set_rect(&mut self, id: NodeId, rect: Rect) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.rect = rect;
        }
    }

    pub fn rect(&self, id: NodeId) -> Rect {
        self.nodes.get(id.0).map(|n| n.rect).unwrap_or_default()
    }

    /// Nearest ancestor-or-self element with `position: fixed`.
    pub fn fixed_container(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if self.element(n).map(|e| e.style.position) == Some(Position::Fixed) {
                return Some(n);
            }
            cur = self.parent(n);
        }
        None
    }

    /// Vertical paint shift applied to a node by a `sticky` ancestor-or-self
    /// at the current scroll position.
    pub fn sticky_shift(&self, id: NodeId) -> f64 {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if let Some(el) = self.element(n) {
                if el.style.position == Position::Sticky {
                    if let Some(top) = el.style.top {
                        let static_y = self.rect(n).y - self.scroll_y;
                        return (top - static_y).max(0.0);
                    }
                    return 0.0;
                }
            }
            cur = self.parent(n);
        }
        0.0
    }

    pub fn height_metrics(&self) -> HeightMetrics {
        let client = self.client_height();
        let body_declared = self.element(self.body).and_then(|b| b.style.height);
        let overflow = self.positioned_bottom().max(self.content_height);
        let body_offset = body_declared.unwrap_or(self.content_height);
        HeightMetrics {
            body_scroll_height: overflow.max(body_offset),
            body_offset_height: body_offset,
            html_client_height: client,
            html_scroll_height: overflow.max(body_offset).max(client),
            html_offset_height: body_offset,
        }
    }

    /// Bottom edge of absolutely positioned content, which does not advance
    /// the flow.
    fn positioned_bottom(&self) -> f64 {
        self.body_elements()
            .into_iter()
            .filter(|id| {
                self.element(*id).is_some_and(|e| {
                    e.style.position == Position::Absolute && e.style.display != Display::None
                })
            })
            .map(|id| self.rect(id).bottom())
            .fold(0.0, f64::max)
    }

    /// Element box relative to the viewport, like `getBoundingClientRect`.
    pub fn bounding_client_rect(&self, id: NodeId) -> Option<Rect> {
        self.node(id)?;
        let mut rect = self.rect(id);
        if self.fixed_container(id).is_none() {
            rect.y += self.sticky_shift(id) - self.scroll_y;
        }
        Some(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(doc: &mut Document, height: f64) -> NodeId {
        let body = doc.body();
        doc.append_element(
            body,
            ElementData::new(
                "div",
                ComputedStyle {
                    height: Some(height),
                    ..Default::default()
                },
            ),
        )
    }

    #[test]
    fn scroll_is_clamped_to_scrollable_range() {
        let mut doc = Document::new(Viewport { width: 400, height: 300 }, 1.0);
        block(&mut doc, 1000.0);
        doc.layout();
        assert_eq!(doc.scroll_to(-50.0), 0.0);
        assert_eq!(doc.scroll_to(5000.0), 700.0);
    }

    #[test]
    fn block_ancestor_skips_inline_elements() {
        let mut doc = Document::new(Viewport::default(), 1.0);
        let div = block(&mut doc, 20.0);
        let span = doc.append_element(div, ElementData::new("span", ComputedStyle::inline()));
        let text = doc.append_text(span, "hello");
        assert_eq!(doc.block_ancestor(text), Some(div));
    }

    #[test]
    fn inline_text_runs_stop_at_nested_blocks() {
        let mut doc = Document::new(Viewport::default(), 1.0);
        let div = block(&mut doc, 20.0);
        doc.append_text(div, "Card:");
        let b = doc.append_element(div, ElementData::new("b", ComputedStyle::inline()));
        doc.append_text(b, "4111 1111");
        let inner = doc.append_element(div, ElementData::new("p", ComputedStyle::default()));
        doc.append_text(inner, "elsewhere");
        doc.append_text(div, "1111 1111");
        assert_eq!(doc.inline_text_runs(div), vec!["Card:", "4111 1111", "1111 1111"]);
        assert_eq!(doc.inline_text_runs(inner), vec!["elsewhere"]);
    }

    #[test]
    fn lazy_load_grows_content_when_near_bottom() {
        let mut doc = Document::new(Viewport { width: 400, height: 300 }, 1.0);
        block(&mut doc, 600.0);
        doc.set_lazy_load(LazyLoad {
            trigger_distance: 50.0,
            block_height: 300.0,
            blocks_per_load: 2,
            max_loads: 1,
            loads: 0,
        });
        doc.layout();
        doc.scroll_to(300.0);
        assert_eq!(doc.height_metrics().html_scroll_height, 1200.0);
        // Load budget exhausted
        doc.scroll_to(900.0);
        assert_eq!(doc.height_metrics().html_scroll_height, 1200.0);
    }

    #[test]
    fn explicit_body_height_under_reports_offset_height() {
        let mut doc = Document::new(Viewport { width: 400, height: 300 }, 1.0);
        let body = doc.body();
        if let Some(b) = doc.element_mut(body) {
            b.style.height = Some(300.0);
        }
        block(&mut doc, 2000.0);
        doc.layout();
        let m = doc.height_metrics();
        assert_eq!(m.body_offset_height, 300.0);
        assert_eq!(m.standard_height(), 2000.0);
    }
}
