/// Very small block layout for the in-process page model
///
/// Blocks stack vertically; an explicit `height` wins over content height;
/// text wraps on an 8px character grid with 16px lines. `fixed` subtrees are
/// laid out against the viewport and `absolute` subtrees at their `top`
/// offset without advancing the flow.

use super::{Display, Document, NodeId, NodeKind, Position, Rect};

pub const CHAR_WIDTH: f64 = 8.0;
pub const LINE_HEIGHT: f64 = 16.0;

/// Lay out the whole document. Returns the bottom of in-flow content.
pub fn layout_document(doc: &mut Document) -> f64 {
    let width = doc.client_width();
    let (html, body) = (doc.html(), doc.body());
    let bottom = layout_children(doc, body, 0.0, 0.0, width);
    let body_height = doc
        .element(body)
        .and_then(|b| b.style.height)
        .unwrap_or(bottom);
    doc.set_rect(body, Rect { x: 0.0, y: 0.0, width, height: body_height });
    doc.set_rect(
        html,
        Rect { x: 0.0, y: 0.0, width, height: body_height.max(doc.client_height()) },
    );
    bottom
}

/// Split text into lines on the character grid.
pub fn wrap_lines(text: &str, width: f64) -> Vec<String> {
    let chars_per_line = if width >= CHAR_WIDTH { (width / CHAR_WIDTH) as usize } else { 1 };
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        if cur.len() + word.len() + 1 > chars_per_line && !cur.is_empty() {
            lines.push(cur);
            cur = word.to_string();
        } else {
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(word);
        }
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

fn layout_children(doc: &mut Document, parent: NodeId, x: f64, y: f64, width: f64) -> f64 {
    let mut cursor = y;
    let children = doc.children(parent).to_vec();
    for child in children {
        let Some(node) = doc.node(child) else { continue };
        let style = match &node.kind {
            NodeKind::Text(text) => {
                let height = wrap_lines(text, width).len() as f64 * LINE_HEIGHT;
                doc.set_rect(child, Rect { x, y: cursor, width, height });
                cursor += height;
                continue;
            }
            NodeKind::Element(el) => el.style.clone(),
        };

        if style.display == Display::None {
            doc.set_rect(child, Rect { x, y: cursor, width: 0.0, height: 0.0 });
            continue;
        }

        match style.position {
            Position::Fixed => {
                let viewport_w = doc.client_width();
                let viewport_h = doc.client_height();
                let w = style.width.unwrap_or(viewport_w);
                let natural = layout_children(doc, child, 0.0, 0.0, w);
                let h = style.height.unwrap_or(natural);
                let top = style
                    .top
                    .or(style.bottom.map(|b| viewport_h - b - h))
                    .unwrap_or(0.0);
                let left = style
                    .left
                    .or(style.right.map(|r| viewport_w - r - w))
                    .unwrap_or(0.0);
                layout_children(doc, child, left, top, w);
                doc.set_rect(child, Rect { x: left, y: top, width: w, height: h });
            }
            Position::Absolute => {
                let w = style.width.unwrap_or(width);
                let top = style.top.unwrap_or(cursor);
                let left = style.left.unwrap_or(x);
                let natural = layout_children(doc, child, left, top, w) - top;
                let h = style.height.unwrap_or(natural);
                doc.set_rect(child, Rect { x: left, y: top, width: w, height: h });
            }
            _ => {
                let w = style.width.unwrap_or(width);
                let natural = layout_children(doc, child, x, cursor, w) - cursor;
                let h = style.height.unwrap_or(natural);
                doc.set_rect(child, Rect { x, y: cursor, width: w, height: h });
                cursor += h;
            }
        }
    }
    cursor
}
