#![forbid(unsafe_code)]

pub mod lookup;
pub mod twitch;
pub mod ws;

use std::fmt;
use std::time::Duration;

use raven_domain::{Badges, ChannelName};
use serde::Deserialize;
use tokio::sync::watch;
use uuid::Uuid;

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Config files can hold the secret directly.
impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Platform user reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
	pub login: String,
	pub display: Option<String>,
}

impl UserRef {
	/// Display name when the platform sent one, login otherwise.
	pub fn display_or_login(&self) -> &str {
		self.display
			.as_deref()
			.filter(|d| !d.trim().is_empty())
			.unwrap_or(&self.login)
	}
}

/// Normalized inbound chat line.
#[derive(Debug, Clone)]
pub struct ChatMessage {
	pub channel: ChannelName,

	pub author: UserRef,

	pub badges: Badges,

	pub text: String,

	/// Set by the transport when the line originated from the bot's own connection.
	pub is_self: bool,

	/// Platform-native message id, if provided.
	pub message_id: Option<String>,
}

/// Chat transport → bot event.
#[derive(Debug, Clone)]
pub enum ChatEvent {
	/// Logged in to the chat server.
	Connected { server: String },

	/// The bot account joined a channel.
	Joined { channel: ChannelName },

	Message(Box<ChatMessage>),

	/// Server NOTICE (rate limits, auth failures, ...).
	Notice {
		channel: Option<String>,
		msg_id: Option<String>,
		text: String,
	},

	/// Connection lost; the transport retries after `retry_in`.
	Disconnected { reason: String, retry_in: Duration },
}

/// Outbound chat capability.
#[async_trait::async_trait]
pub trait ChatSink: Send + Sync + 'static {
	async fn say(&self, channel: &ChannelName, text: &str) -> anyhow::Result<()>;
}

/// Process-wide shutdown signal; `true` means stop.
pub type ShutdownTx = watch::Sender<bool>;
pub type ShutdownRx = watch::Receiver<bool>;

pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
	watch::channel(false)
}

/// Resolve once shutdown has been requested (or every sender is gone).
pub async fn wait_for_shutdown(rx: &mut ShutdownRx) {
	loop {
		if *rx.borrow_and_update() {
			return;
		}
		if rx.changed().await.is_err() {
			return;
		}
	}
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

/// Exponential delay doubling from `min`, clamped to `[min, max]`.
pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}
