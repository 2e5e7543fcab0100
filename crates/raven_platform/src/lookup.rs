#![forbid(unsafe_code)]

//! "Last played game" lookup used by shoutouts.

use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::StatusCode;
use tracing::{debug, warn};

/// Result of a last-game lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastGame {
	/// The service does not know the user.
	NotFound,
	/// Known user without a recorded game.
	NoGame,
	Game(String),
}

#[async_trait::async_trait]
pub trait GameLookup: Send + Sync + 'static {
	/// `login` is the lower-cased account name.
	async fn last_game(&self, login: &str) -> anyhow::Result<LastGame>;
}

/// Map the plain-text body to a result. The service answers 200 for unknown users
/// with a `User not found` sentence.
pub fn classify_lookup_body(body: &str) -> LastGame {
	if body.starts_with("User not found") {
		return LastGame::NotFound;
	}
	let game = body.trim();
	if game.is_empty() {
		LastGame::NoGame
	} else {
		LastGame::Game(game.to_string())
	}
}

/// decapi.me `twitch/game` client.
#[derive(Debug, Clone)]
pub struct DecApiLookup {
	base_url: String,
	user_agent: String,
	retry_delay: Duration,
	client: reqwest::Client,
}

impl DecApiLookup {
	pub const DEFAULT_BASE_URL: &'static str = "https://decapi.me/twitch/game";

	pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			user_agent: user_agent.into(),
			retry_delay: Duration::from_millis(250),
			client: reqwest::Client::new(),
		}
	}

	pub fn with_retry_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;
		self
	}

	async fn fetch_once(&self, url: &str) -> anyhow::Result<(StatusCode, String)> {
		let resp = self
			.client
			.get(url)
			.header("User-Agent", &self.user_agent)
			.timeout(Duration::from_secs(10))
			.send()
			.await
			.context("game lookup request")?;
		let status = resp.status();
		let body = resp.text().await.context("game lookup body")?;
		Ok((status, body))
	}
}

#[async_trait::async_trait]
impl GameLookup for DecApiLookup {
	async fn last_game(&self, login: &str) -> anyhow::Result<LastGame> {
		let url = format!(
			"{}/{}",
			self.base_url.trim_end_matches('/'),
			urlencoding::encode(login)
		);

		let (mut status, mut body) = self.fetch_once(&url).await?;
		if status.is_server_error() {
			warn!(%status, login, "game lookup failed; retrying once");
			tokio::time::sleep(self.retry_delay).await;
			(status, body) = self.fetch_once(&url).await?;
		}

		if !status.is_success() {
			return Err(anyhow!("game lookup failed: status={status}"));
		}
		debug!(login, body = %body.trim(), "game lookup");
		Ok(classify_lookup_body(&body))
	}
}
