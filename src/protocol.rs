//! Messages exchanged between the orchestrator, the page agent and the
//! compositor.
//!
//! Every exchange is a request/response pair. The wire form is JSON tagged by
//! `type` with camelCase fields; images travel as `data:image/png;base64,`
//! URLs.

use serde::{Deserialize, Serialize};

/// Requests understood by the page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRequest {
    /// Liveness probe; no side effects
    Ping,
    /// Hide scrollbars, freeze animations, collect fixed/sticky chrome and
    /// redact sensitive content
    PrepareCapture,
    /// Snapshot the page geometry
    GetPageInfo,
    /// Scroll instantly to `y` and report where the page actually landed
    ScrollTo { y: f64 },
    /// Undo `PrepareCapture` and optionally restore the scroll position
    #[serde(rename_all = "camelCase")]
    FinishCapture {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_scroll_y: Option<f64>,
    },
}

impl AgentRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRequest::Ping => "PING",
            AgentRequest::PrepareCapture => "PREPARE_CAPTURE",
            AgentRequest::GetPageInfo => "GET_PAGE_INFO",
            AgentRequest::ScrollTo { .. } => "SCROLL_TO",
            AgentRequest::FinishCapture { .. } => "FINISH_CAPTURE",
        }
    }
}

/// Replies sent by the page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentResponse {
    Pong,
    Ack,
    PageInfo(PageMetrics),
    Scrolled(ScrollOutcome),
}

/// Page geometry in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    /// Max of the standard DOM height metrics and the bottom-most element edge
    pub full_height: f64,
    pub client_height: f64,
    pub device_pixel_ratio: f64,
    pub original_scroll_y: f64,
    pub width: f64,
}

/// Where a `ScrollTo` actually landed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollOutcome {
    pub current_scroll_y: f64,
    /// Scrollable height re-measured after the scroll settled
    pub new_scroll_height: f64,
}

/// One viewport screenshot and the scroll offset the page reported for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(with = "data_url")]
    pub image: Vec<u8>,
    pub captured_at_scroll_y: f64,
}

/// Compositor input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchRequest {
    pub frames: Vec<Frame>,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub total_height: f64,
    pub device_pixel_ratio: f64,
}

/// Requests understood by the compositor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositorRequest {
    StitchImages(StitchRequest),
}

/// Compositor reply: a finished image or an explicit error, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StitchResponse {
    #[serde(rename_all = "camelCase")]
    Image { data_url: String },
    Error { error: String },
}

/// `data:image/png;base64,` encoding of raw PNG bytes
pub mod data_url {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const PNG_PREFIX: &str = "data:image/png;base64,";

    pub fn encode(bytes: &[u8]) -> String {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        format!("{}{}", PNG_PREFIX, b64)
    }

    pub fn decode(url: &str) -> Result<Vec<u8>, String> {
        let payload = match url.split_once(',') {
            Some((header, payload)) if header.starts_with("data:") && header.ends_with(";base64") => {
                payload
            }
            _ => return Err("not a base64 data URL".to_string()),
        };
        base64::engine::general_purpose::STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| format!("base64 decode failed: {}", e))
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_requests_use_tagged_wire_format() {
        let scroll = serde_json::to_value(AgentRequest::ScrollTo { y: 720.0 }).unwrap();
        assert_eq!(scroll, json!({"type": "SCROLL_TO", "y": 720.0}));

        let finish = serde_json::to_value(AgentRequest::FinishCapture {
            original_scroll_y: Some(40.0),
        })
        .unwrap();
        assert_eq!(finish, json!({"type": "FINISH_CAPTURE", "originalScrollY": 40.0}));

        let bare: AgentRequest = serde_json::from_value(json!({"type": "FINISH_CAPTURE"})).unwrap();
        assert_eq!(bare, AgentRequest::FinishCapture { original_scroll_y: None });
    }

    #[test]
    fn page_info_reply_is_camel_case() {
        let reply = AgentResponse::PageInfo(PageMetrics {
            full_height: 5000.0,
            client_height: 800.0,
            device_pixel_ratio: 2.0,
            original_scroll_y: 0.0,
            width: 1280.0,
        });
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["type"], "PAGE_INFO");
        assert_eq!(v["fullHeight"], 5000.0);
        assert_eq!(v["devicePixelRatio"], 2.0);
    }

    #[test]
    fn frames_travel_as_data_urls() {
        let frame = Frame {
            image: vec![1, 2, 3],
            captured_at_scroll_y: 720.0,
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["image"], "data:image/png;base64,AQID");
        assert_eq!(v["capturedAtScrollY"], 720.0);
        let back: Frame = serde_json::from_value(v).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn stitch_response_is_image_or_error() {
        let ok: StitchResponse = serde_json::from_value(json!({"dataUrl": "data:,x"})).unwrap();
        assert!(matches!(ok, StitchResponse::Image { .. }));
        let err: StitchResponse = serde_json::from_value(json!({"error": "decode"})).unwrap();
        assert_eq!(err, StitchResponse::Error { error: "decode".into() });
    }

    #[test]
    fn stitch_request_is_tagged() {
        let req = CompositorRequest::StitchImages(StitchRequest {
            frames: vec![],
            viewport_width: 800.0,
            viewport_height: 600.0,
            total_height: 600.0,
            device_pixel_ratio: 1.0,
        });
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "STITCH_IMAGES");
        assert_eq!(v["viewportWidth"], 800.0);
        assert_eq!(v["totalHeight"], 600.0);
    }

    #[test]
    fn data_url_rejects_other_schemes() {
        assert!(data_url::decode("https://example.com/a.png").is_err());
    }
}
