#![forbid(unsafe_code)]

//! PubSub wire frames.
//!
//! Outbound frames are `{"type": "LISTEN", ...}` / `{"type": "PING"}`.
//! Inbound control frames carry a top-level `type`; domain events arrive in a
//! `MESSAGE` envelope (or one without a `type`) whose `data.message` is itself a JSON string.

use raven_domain::ChannelName;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum OutboundFrame {
	Listen { data: ListenData },
	Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenData {
	pub auth_token: String,
	pub topics: Vec<String>,
}

impl OutboundFrame {
	pub fn listen(auth_token: impl Into<String>, topics: Vec<String>) -> Self {
		Self::Listen {
			data: ListenData {
				auth_token: auth_token.into(),
				topics,
			},
		}
	}

	pub fn to_json(&self) -> String {
		// Unit variants and string fields cannot fail to serialize.
		serde_json::to_string(self).unwrap_or_default()
	}
}

/// Stream status topic for a channel.
pub fn video_playback_topic(channel: &ChannelName) -> String {
	format!("video-playback.{}", channel.as_str())
}

/// Token used in LISTEN: the part after `oauth:` when present.
pub fn listen_token(oauth: &str) -> &str {
	let oauth = oauth.trim();
	oauth.strip_prefix("oauth:").unwrap_or(oauth)
}

/// Discriminator of a payload nothing handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhandledKind {
	/// Unknown top-level `type`.
	ControlType(String),
	/// Unknown `type` inside `data.message`.
	MessageType(String),
	/// Valid JSON with neither a `type` nor a `data.message`.
	Unknown,
	/// Not JSON, or an envelope whose inner message is not JSON.
	Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledPayload {
	pub kind: UnhandledKind,
	/// Pretty-printed frame, or the raw text when it did not parse.
	pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
	Pong,
	Reconnect,
	/// LISTEN acknowledgement; a non-empty `error` means the subscription failed.
	Response { error: Option<String> },
	StreamUp,
	StreamDown,
	Unhandled(UnhandledPayload),
}

#[derive(Debug, Deserialize)]
struct FramePeek {
	#[serde(default, rename = "type")]
	kind: Option<String>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
	#[serde(default)]
	message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagePeek {
	#[serde(default, rename = "type")]
	kind: Option<String>,
}

fn pretty(value: &serde_json::Value) -> String {
	let mut out = Vec::new();
	let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
	let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
	match value.serialize(&mut ser) {
		Ok(()) => String::from_utf8(out).unwrap_or_else(|_| value.to_string()),
		Err(_) => value.to_string(),
	}
}

fn unhandled(kind: UnhandledKind, body: String) -> Inbound {
	Inbound::Unhandled(UnhandledPayload { kind, body })
}

/// Classify one inbound text frame.
pub fn classify(raw: &str) -> Inbound {
	let value: serde_json::Value = match serde_json::from_str(raw) {
		Ok(v) => v,
		Err(_) => return unhandled(UnhandledKind::Malformed, raw.to_string()),
	};
	let peek = match FramePeek::deserialize(&value) {
		Ok(p) => p,
		Err(_) => return unhandled(UnhandledKind::Malformed, raw.to_string()),
	};

	match peek.kind.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
		Some("PONG") => return Inbound::Pong,
		Some("RECONNECT") => return Inbound::Reconnect,
		Some("RESPONSE") => {
			return Inbound::Response {
				error: peek.error.filter(|e| !e.is_empty()),
			};
		}
		Some("MESSAGE") | None => {}
		Some(other) => return unhandled(UnhandledKind::ControlType(other.to_string()), pretty(&value)),
	}

	let Some(message) = peek.data.and_then(|d| d.message) else {
		return unhandled(UnhandledKind::Unknown, pretty(&value));
	};

	match serde_json::from_str::<MessagePeek>(&message) {
		Ok(inner) => match inner.kind.as_deref() {
			Some("stream-up") => Inbound::StreamUp,
			Some("stream-down") => Inbound::StreamDown,
			other => unhandled(
				UnhandledKind::MessageType(other.unwrap_or("undefined").to_string()),
				pretty(&value),
			),
		},
		Err(_) => unhandled(UnhandledKind::Malformed, pretty(&value)),
	}
}
