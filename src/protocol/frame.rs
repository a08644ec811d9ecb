//! Signaling frame codec
//!
//! Inbound frames are JSON text objects with a `type` discriminator. They
//! are decoded exactly once, at the transport boundary, into an
//! [`InboundFrame`] whose [`FrameKind`] is a closed set. Payload fields
//! (`sdp`, `candidate`, `message`, ...) are never interpreted: the original
//! text is kept so the frame can be relayed verbatim.
//!
//! Outbound frames synthesized by the server (`match`, `leave`) are
//! [`ServerFrame`] values.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::identity::Identity;
use super::media::{MediaState, MediaStateUpdate};

/// Error decoding or encoding a frame
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Text is not a JSON object with a string `type` field
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Frame could not be serialized
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Kind of an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Offer,
    Answer,
    Candidate,
    Next,
    Leave,
    MediaStateChange(MediaStateUpdate),
    Chat,
    /// Any other `type`, including a client-sent `match`
    Unrecognized(String),
}

impl FrameKind {
    /// Wire name of the frame type
    pub fn name(&self) -> &str {
        match self {
            FrameKind::Offer => "offer",
            FrameKind::Answer => "answer",
            FrameKind::Candidate => "candidate",
            FrameKind::Next => "next",
            FrameKind::Leave => "leave",
            FrameKind::MediaStateChange(_) => "media-state-change",
            FrameKind::Chat => "chat",
            FrameKind::Unrecognized(kind) => kind,
        }
    }
}

#[derive(Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default, alias = "client")]
    partner: Option<String>,
    #[serde(default, rename = "mediaState")]
    media_state: Option<MediaStateUpdate>,
}

/// A decoded client frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Frame kind
    pub kind: FrameKind,
    /// Sender identity as declared by the client (untrusted)
    pub user: Option<Identity>,
    /// Target partner as declared by the client
    pub partner: Option<Identity>,
    raw: String,
}

impl InboundFrame {
    /// Decode a text message
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        if !text.trim_start().starts_with('{') {
            return Err(FrameError::Malformed(serde::de::Error::custom(
                "frame is not a JSON object",
            )));
        }
        let header: FrameHeader = serde_json::from_str(text).map_err(FrameError::Malformed)?;

        let kind = match header.kind.as_str() {
            "offer" => FrameKind::Offer,
            "answer" => FrameKind::Answer,
            "candidate" => FrameKind::Candidate,
            "next" => FrameKind::Next,
            "leave" => FrameKind::Leave,
            "media-state-change" => {
                FrameKind::MediaStateChange(header.media_state.unwrap_or_default())
            }
            "chat" => FrameKind::Chat,
            _ => FrameKind::Unrecognized(header.kind),
        };

        Ok(Self {
            kind,
            user: header.user.map(Identity::from),
            partner: header.partner.map(Identity::from),
            raw: text.to_owned(),
        })
    }

    /// Original text of the frame
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Text to forward to the partner on behalf of `sender`
    ///
    /// The original text is reused when the declared `user` already matches
    /// the authenticated sender. Otherwise only the `user` member is
    /// rewritten (or inserted first) so a client cannot speak for another
    /// identity; every other byte is kept.
    pub fn payload_for(&self, sender: &Identity) -> Result<String, FrameError> {
        if self.user.as_ref() == Some(sender) {
            return Ok(self.raw.clone());
        }

        let user = serde_json::to_string(sender).map_err(FrameError::Encode)?;
        let raw = self.raw.as_str();
        let mut payload = String::with_capacity(raw.len() + user.len() + 8);

        match member_value_span(raw, "user") {
            Some(span) => {
                payload.push_str(&raw[..span.start]);
                payload.push_str(&user);
                payload.push_str(&raw[span.end..]);
            }
            None => {
                let open = raw
                    .find('{')
                    .ok_or_else(|| FrameError::Malformed(serde::de::Error::custom("no object")))?;
                let rest = &raw[open + 1..];
                payload.push_str(&raw[..=open]);
                payload.push_str("\"user\":");
                payload.push_str(&user);
                if !rest.trim_start().starts_with('}') {
                    payload.push(',');
                }
                payload.push_str(rest);
            }
        }
        Ok(payload)
    }
}

/// Byte range of the value of top-level member `name` in a JSON object
///
/// `text` must already be valid JSON.
fn member_value_span(text: &str, name: &str) -> Option<Range<usize>> {
    let bytes = text.as_bytes();
    let mut pos = skip_whitespace(bytes, 0);
    if bytes.get(pos) != Some(&b'{') {
        return None;
    }
    pos += 1;

    loop {
        pos = skip_whitespace(bytes, pos);
        match bytes.get(pos)? {
            b',' => {
                pos += 1;
                continue;
            }
            b'"' => {}
            _ => return None,
        }

        let key_end = skip_string(bytes, pos)?;
        let key: String = serde_json::from_str(&text[pos..key_end]).ok()?;
        pos = skip_whitespace(bytes, key_end);
        if bytes.get(pos) != Some(&b':') {
            return None;
        }
        let start = skip_whitespace(bytes, pos + 1);
        let end = skip_value(bytes, start)?;
        if key == name {
            return Some(start..end);
        }
        pos = end;
    }
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while matches!(bytes.get(pos), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        pos += 1;
    }
    pos
}

/// Index just past the string literal opening at `pos`
fn skip_string(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos + 1;
    loop {
        match bytes.get(i)? {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
}

/// Index just past the value starting at `pos`
fn skip_value(bytes: &[u8], pos: usize) -> Option<usize> {
    match bytes.get(pos)? {
        b'"' => skip_string(bytes, pos),
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut i = pos;
            loop {
                match bytes.get(i)? {
                    b'"' => {
                        i = skip_string(bytes, i)?;
                        continue;
                    }
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(i + 1);
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
        }
        _ => {
            let mut i = pos;
            while !matches!(
                bytes.get(i),
                None | Some(b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r')
            ) {
                i += 1;
            }
            (i > pos).then_some(i)
        }
    }
}

/// Frame synthesized by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// A partner was found
    Match {
        partner: Identity,
        #[serde(rename = "mediaState")]
        media_state: MediaState,
    },
    /// The partner left the pairing or disconnected
    Leave { user: Identity },
}

impl ServerFrame {
    /// Encode to JSON text
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_offer() {
        let text = r#"{"type":"offer","user":"u1","partner":"u2","sdp":{"type":"offer","sdp":"v=0"}}"#;
        let frame = InboundFrame::decode(text).unwrap();

        assert_eq!(frame.kind, FrameKind::Offer);
        assert_eq!(frame.user, Some(Identity::new("u1")));
        assert_eq!(frame.partner, Some(Identity::new("u2")));
        assert_eq!(frame.raw(), text);
    }

    #[test]
    fn test_decode_client_alias() {
        let frame = InboundFrame::decode(r#"{"type":"answer","user":"u2","client":"u1"}"#).unwrap();
        assert_eq!(frame.partner, Some(Identity::new("u1")));
    }

    #[test]
    fn test_decode_media_state_change() {
        let frame = InboundFrame::decode(
            r#"{"type":"media-state-change","user":"u1","mediaState":{"video":false}}"#,
        )
        .unwrap();

        assert_eq!(
            frame.kind,
            FrameKind::MediaStateChange(MediaStateUpdate {
                microphone: None,
                video: Some(false),
            })
        );
    }

    #[test]
    fn test_decode_unrecognized_and_match() {
        let frame = InboundFrame::decode(r#"{"type":"dance","user":"u1"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Unrecognized("dance".into()));

        // match is server-only
        let frame = InboundFrame::decode(r#"{"type":"match","partner":"u9"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Unrecognized("match".into()));
        assert_eq!(frame.kind.name(), "match");
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"user":"u1"}"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"["offer"]"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_payload_kept_verbatim_for_matching_sender() {
        let text = r#"{"type":"chat","user":"u1","partner":"u2","message":"hi"}"#;
        let frame = InboundFrame::decode(text).unwrap();

        assert_eq!(frame.payload_for(&Identity::new("u1")).unwrap(), text);
    }

    #[test]
    fn test_payload_stamps_authenticated_sender() {
        let frame =
            InboundFrame::decode(r#"{"type":"chat","user":"mallory","message":"hi"}"#).unwrap();
        let payload = frame.payload_for(&Identity::new("u1")).unwrap();

        assert_eq!(payload, r#"{"type":"chat","user":"u1","message":"hi"}"#);
    }

    #[test]
    fn test_payload_inserts_missing_user_keeping_other_bytes() {
        let text = r#"{"type":"media-state-change", "mediaState":{"video":false},"n":12345678901234567890123}"#;
        let frame = InboundFrame::decode(text).unwrap();

        let payload = frame.payload_for(&Identity::new("u1")).unwrap();

        assert_eq!(
            payload,
            r#"{"user":"u1","type":"media-state-change", "mediaState":{"video":false},"n":12345678901234567890123}"#
        );
    }

    #[test]
    fn test_payload_rewrites_only_top_level_user() {
        let text = r#"{ "type" : "chat", "message" : {"user":"x,}"}, "user" : null }"#;
        let frame = InboundFrame::decode(text).unwrap();

        let payload = frame.payload_for(&Identity::new("u1")).unwrap();

        assert_eq!(
            payload,
            r#"{ "type" : "chat", "message" : {"user":"x,}"}, "user" : "u1" }"#
        );
    }

    #[test]
    fn test_payload_escapes_identity() {
        let frame = InboundFrame::decode(r#"{"type":"chat"}"#).unwrap();

        let payload = frame.payload_for(&Identity::new("a\"b")).unwrap();

        assert_eq!(payload, r#"{"user":"a\"b","type":"chat"}"#);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["user"], "a\"b");
    }

    #[test]
    fn test_encode_match() {
        let frame = ServerFrame::Match {
            partner: Identity::new("u2"),
            media_state: MediaState::default(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "type": "match",
                "partner": "u2",
                "mediaState": {"microphone": true, "video": true}
            })
        );
    }

    #[test]
    fn test_encode_leave() {
        let frame = ServerFrame::Leave {
            user: Identity::new("u1"),
        };
        assert_eq!(frame.encode().unwrap(), r#"{"type":"leave","user":"u1"}"#);
    }
}
