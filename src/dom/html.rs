//! Build a `Document` from HTML text.
//!
//! Only inline `style` attributes are honoured; `<style>` blocks and linked
//! stylesheets are ignored. That is enough to describe fixed headers, sticky
//! rails, explicit block heights and colours for capture tests and the CLI.

use scraper::{ElementRef, Html, Selector};

use super::{ComputedStyle, Display, Document, ElementData, NodeId, Position, Rgba};
use crate::Viewport;

const SKIPPED_TAGS: &[&str] = &["head", "script", "style", "template", "noscript", "link", "meta"];
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "cite", "code", "em", "i", "kbd", "label", "mark", "q", "s", "small",
    "span", "strong", "sub", "sup", "time", "u", "var",
];
const FIELD_HEIGHT: f64 = 24.0;

/// Parse `html` into a laid-out document for the given viewport.
pub fn parse_document(html: &str, viewport: Viewport, device_pixel_ratio: f64) -> Document {
    let parsed = Html::parse_document(html);
    let mut doc = Document::new(viewport, device_pixel_ratio);

    let title_sel = Selector::parse("title").unwrap();
    let title = parsed
        .select(&title_sel)
        .next()
        .map(|n| n.text().collect::<String>())
        .unwrap_or_default();
    doc.set_title(title.trim());

    let body_sel = Selector::parse("body").unwrap();
    if let Some(body) = parsed.select(&body_sel).next() {
        let body_id = doc.body();
        if let Some(el) = doc.element_mut(body_id) {
            el.style = style_for(&body);
        }
        append_children(&mut doc, body_id, body);
    }

    doc.layout();
    doc
}

fn append_children(doc: &mut Document, parent: NodeId, source: ElementRef<'_>) {
    for child in source.children() {
        match child.value() {
            scraper::Node::Text(t) => {
                let text: &str = t;
                if !text.trim().is_empty() {
                    doc.append_text(parent, text.trim());
                }
            }
            scraper::Node::Element(_) => {
                let Some(el) = ElementRef::wrap(child) else { continue };
                let tag = el.value().name().to_ascii_lowercase();
                if SKIPPED_TAGS.contains(&tag.as_str()) {
                    continue;
                }
                let mut data = ElementData::new(&tag, style_for(&el));
                data.attrs = el
                    .value()
                    .attrs()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect();
                match tag.as_str() {
                    "input" => {
                        data.value = el.value().attr("value").map(|v| v.to_string());
                        if data.style.height.is_none() {
                            data.style.height = Some(FIELD_HEIGHT);
                        }
                        doc.append_element(parent, data);
                    }
                    "textarea" => {
                        data.value = Some(el.text().collect::<String>());
                        if data.style.height.is_none() {
                            data.style.height = Some(FIELD_HEIGHT * 2.0);
                        }
                        doc.append_element(parent, data);
                    }
                    _ => {
                        let id = doc.append_element(parent, data);
                        append_children(doc, id, el);
                    }
                }
            }
            _ => {}
        }
    }
}

fn style_for(el: &ElementRef<'_>) -> ComputedStyle {
    let tag = el.value().name().to_ascii_lowercase();
    let mut style = if INLINE_TAGS.contains(&tag.as_str()) {
        ComputedStyle::inline()
    } else {
        ComputedStyle::default()
    };
    if el.value().attr("hidden").is_some() {
        style.display = Display::None;
    }
    if let Some(css) = el.value().attr("style") {
        apply_declarations(&mut style, css);
    }
    style
}

/// Apply `prop: value; ...` declarations onto `style`.
pub fn apply_declarations(style: &mut ComputedStyle, css: &str) {
    for decl in css.split(';') {
        let Some((prop, value)) = decl.split_once(':') else { continue };
        let prop = prop.trim().to_ascii_lowercase();
        let value = value.trim().trim_end_matches("!important").trim().to_ascii_lowercase();
        match prop.as_str() {
            "display" => {
                style.display = match value.as_str() {
                    "none" => Display::None,
                    "inline" => Display::Inline,
                    _ => Display::Block,
                }
            }
            "position" => {
                style.position = match value.as_str() {
                    "relative" => Position::Relative,
                    "absolute" => Position::Absolute,
                    "fixed" => Position::Fixed,
                    "sticky" | "-webkit-sticky" => Position::Sticky,
                    _ => Position::Static,
                }
            }
            "top" => style.top = parse_length(&value),
            "bottom" => style.bottom = parse_length(&value),
            "left" => style.left = parse_length(&value),
            "right" => style.right = parse_length(&value),
            "width" => style.width = parse_length(&value),
            "height" => style.height = parse_length(&value),
            "visibility" => style.hidden = value == "hidden" || value == "collapse",
            "opacity" => {
                if let Ok(o) = value.parse::<f64>() {
                    style.opacity = o.clamp(0.0, 1.0);
                }
            }
            "background" | "background-color" => style.background = parse_color(&value),
            "color" => {
                if let Some(c) = parse_color(&value) {
                    style.color = c;
                }
            }
            _ => {}
        }
    }
}

/// Parse a pixel length (`12px`, `12`); `auto` and unsupported units yield `None`.
pub fn parse_length(value: &str) -> Option<f64> {
    let v = value.trim();
    let number = v.strip_suffix("px").unwrap_or(v).trim();
    number.parse::<f64>().ok()
}

/// Parse `#rgb`, `#rrggbb`, `rgb(r, g, b)` or a handful of named colours.
pub fn parse_color(value: &str) -> Option<Rgba> {
    let v = value.trim();
    if let Some(hex) = v.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        return match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, c) in hex.chars().enumerate() {
                    let d = c.to_digit(16)? as u8;
                    out[i] = d * 17;
                }
                Some(Rgba(out[0], out[1], out[2], 255))
            }
            6 => Some(Rgba(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                255,
            )),
            _ => None,
        };
    }
    if let Some(args) = v.strip_prefix("rgb(").and_then(|s| s.strip_suffix(')')) {
        let parts: Vec<u8> = args
            .split(',')
            .filter_map(|p| p.trim().parse::<u8>().ok())
            .collect();
        if parts.len() == 3 {
            return Some(Rgba(parts[0], parts[1], parts[2], 255));
        }
        return None;
    }
    match v {
        "white" => Some(Rgba::WHITE),
        "black" => Some(Rgba::BLACK),
        "red" => Some(Rgba(255, 0, 0, 255)),
        "green" => Some(Rgba(0, 128, 0, 255)),
        "blue" => Some(Rgba(0, 0, 255, 255)),
        "yellow" => Some(Rgba(255, 255, 0, 255)),
        "gray" | "grey" => Some(Rgba(128, 128, 128, 255)),
        _ => None,
    }
}
