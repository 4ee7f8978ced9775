/// Paint commands for a viewport of a `Document`

use crate::dom::layout::{wrap_lines, CHAR_WIDTH, LINE_HEIGHT};
use crate::dom::{Document, NodeId, NodeKind, Rgba};

pub const SCROLLBAR_WIDTH: f64 = 12.0;
const SCROLLBAR_TRACK: Rgba = Rgba(241, 241, 241, 255);
const SCROLLBAR_THUMB: Rgba = Rgba(193, 193, 193, 255);
pub const TEXT_BAR_HEIGHT: f64 = 10.0;

/// Coordinates are CSS pixels relative to the top-left of the painted region.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        rgba: Rgba,
    },
    /// One line of text, drawn as a bar the width of its glyph run
    TextRun {
        x: f64,
        y: f64,
        chars: usize,
        rgba: Rgba,
    },
    /// Blur and desaturate whatever has been painted inside the rect
    Obscure {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

/// Build the paint list for the document region `[top, top + height)`.
///
/// `top` is the scroll offset of the region; in-flow content shifts with it
/// while fixed content stays put.
pub fn build_display_list(doc: &Document, top: f64, height: f64) -> Vec<PaintCommand> {
    let mut out = Vec::new();
    out.push(PaintCommand::SolidRect {
        x: 0.0,
        y: 0.0,
        width: doc.client_width(),
        height,
        rgba: Rgba::WHITE,
    });

    let mut layers = Painter { doc, top, flow: Vec::new(), fixed: Vec::new() };
    for child in doc.children(doc.body()) {
        layers.paint_node(*child, Rgba::BLACK, false, false);
    }
    out.append(&mut layers.flow);
    out.append(&mut layers.fixed);

    if !doc.scrollbars_hidden() {
        let x = doc.client_width() - SCROLLBAR_WIDTH;
        out.push(PaintCommand::SolidRect { x, y: 0.0, width: SCROLLBAR_WIDTH, height, rgba: SCROLLBAR_TRACK });
        let total = doc.height_metrics().html_scroll_height.max(1.0);
        let thumb_h = (height * height / total).clamp(20.0, height);
        let thumb_y = (top / total) * height;
        out.push(PaintCommand::SolidRect {
            x: x + 2.0,
            y: thumb_y,
            width: SCROLLBAR_WIDTH - 4.0,
            height: thumb_h,
            rgba: SCROLLBAR_THUMB,
        });
    }
    out
}

struct Painter<'a> {
    doc: &'a Document,
    top: f64,
    flow: Vec<PaintCommand>,
    fixed: Vec<PaintCommand>,
}

impl Painter<'_> {
    fn offset(&self, id: NodeId) -> f64 {
        if self.doc.fixed_container(id).is_some() {
            0.0
        } else {
            self.doc.sticky_shift(id) - self.top
        }
    }

    fn paint_node(&mut self, id: NodeId, color: Rgba, hidden: bool, in_fixed: bool) {
        let doc = self.doc;
        let Some(node) = doc.node(id) else { return };
        let rect = node.rect;
        let dy = self.offset(id);
        match &node.kind {
            NodeKind::Text(text) => {
                if hidden {
                    return;
                }
                let layer = if in_fixed { &mut self.fixed } else { &mut self.flow };
                for (i, line) in wrap_lines(text, rect.width).iter().enumerate() {
                    let line_y = rect.y + dy + i as f64 * LINE_HEIGHT;
                    layer.push(PaintCommand::TextRun {
                        x: rect.x,
                        y: line_y + (LINE_HEIGHT - TEXT_BAR_HEIGHT) / 2.0,
                        chars: line.chars().count(),
                        rgba: color,
                    });
                }
            }
            NodeKind::Element(el) => {
                if el.style.display == crate::dom::Display::None {
                    return;
                }
                let hidden = hidden || el.is_invisible();
                let in_fixed = in_fixed || el.style.position == crate::dom::Position::Fixed;
                if !hidden {
                    if let Some(bg) = el.style.background {
                        let layer = if in_fixed { &mut self.fixed } else { &mut self.flow };
                        layer.push(PaintCommand::SolidRect {
                            x: rect.x,
                            y: rect.y + dy,
                            width: rect.width,
                            height: rect.height,
                            rgba: bg,
                        });
                    }
                }
                for child in doc.children(id) {
                    self.paint_node(*child, el.style.color, hidden, in_fixed);
                }
                let blurred = el.inline.get("filter").is_some_and(|f| f.contains("blur("));
                if blurred && !hidden {
                    let layer = if in_fixed { &mut self.fixed } else { &mut self.flow };
                    layer.push(PaintCommand::Obscure {
                        x: rect.x,
                        y: rect.y + dy,
                        width: rect.width,
                        height: rect.height,
                    });
                }
            }
        }
    }
}

/// Width in CSS pixels of a text run of `chars` characters.
pub fn text_run_width(chars: usize) -> f64 {
    chars as f64 * CHAR_WIDTH
}
