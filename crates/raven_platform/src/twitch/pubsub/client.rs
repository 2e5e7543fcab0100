#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use raven_domain::ChannelName;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::frames::{self, Inbound, OutboundFrame, UnhandledPayload};
use super::heartbeat::{HeartbeatSession, HeartbeatTiming, ReconnectPolicy};
use crate::ws::{WsConnector, WsSink, WsStream, default_ws_connector};
use crate::{SecretString, ShutdownRx, wait_for_shutdown};

#[derive(Clone)]
pub struct PubSubConfig {
	pub ws_url: String,
	/// Bare token (no `oauth:` prefix).
	pub auth_token: SecretString,
	pub topics: Vec<String>,
	pub timing: HeartbeatTiming,
	pub reconnect: ReconnectPolicy,
	pub ws_connector: Option<WsConnector>,
}

impl PubSubConfig {
	/// Subscribe to the stream status topic of `channel`.
	pub fn new(channel: &ChannelName, oauth: &SecretString) -> Self {
		Self {
			ws_url: "wss://pubsub-edge.twitch.tv".to_string(),
			auth_token: SecretString::new(frames::listen_token(oauth.expose())),
			topics: vec![frames::video_playback_topic(channel)],
			timing: HeartbeatTiming::default(),
			reconnect: ReconnectPolicy::default(),
			ws_connector: None,
		}
	}
}

/// Why a connection is being recreated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectTrigger {
	PongTimeout,
	ServerRequested,
	ConnectionLost(String),
}

impl ReconnectTrigger {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::PongTimeout => "pong_timeout",
			Self::ServerRequested => "server_requested",
			Self::ConnectionLost(_) => "connection_lost",
		}
	}
}

impl fmt::Display for ReconnectTrigger {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ConnectionLost(reason) => write!(f, "connection lost: {reason}"),
			other => f.write_str(other.as_str()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubEvent {
	Connected {
		generation: u64,
	},
	/// LISTEN acknowledged (`error` is set when Twitch rejected it).
	Subscribed {
		generation: u64,
		error: Option<String>,
	},
	StreamUp,
	StreamDown,
	/// The session ended; a new socket opens after `delay`.
	Reconnecting {
		generation: u64,
		trigger: ReconnectTrigger,
		delay: Duration,
	},
	ConnectFailed {
		attempt: u32,
		retry_in: Duration,
		error: String,
	},
	Unhandled(UnhandledPayload),
}

enum SessionEnd {
	Shutdown,
	Reconnect {
		trigger: ReconnectTrigger,
		/// At least one frame arrived on this socket.
		healthy: bool,
	},
}

/// Twitch PubSub client for stream status, with an application-level heartbeat.
pub struct PubSubClient {
	cfg: PubSubConfig,
}

impl PubSubClient {
	pub fn new(cfg: PubSubConfig) -> Self {
		Self { cfg }
	}

	pub fn spawn(
		self,
		shutdown_rx: ShutdownRx,
		events_capacity: usize,
	) -> (mpsc::Receiver<PubSubEvent>, JoinHandle<anyhow::Result<()>>) {
		let (events_tx, events_rx) = mpsc::channel(events_capacity.max(1));
		let task = tokio::spawn(self.run(shutdown_rx, events_tx));
		(events_rx, task)
	}

	fn emit(events_tx: &mpsc::Sender<PubSubEvent>, event: PubSubEvent) {
		if let Err(e) = events_tx.try_send(event) {
			warn!(error = %e, "pubsub event dropped");
		}
	}

	pub async fn run(self, mut shutdown_rx: ShutdownRx, events_tx: mpsc::Sender<PubSubEvent>) -> anyhow::Result<()> {
		let url = Url::parse(&self.cfg.ws_url).context("parse pubsub ws url")?;
		let connector = self.cfg.ws_connector.clone().unwrap_or_else(default_ws_connector);

		let mut generation: u64 = 0;
		let mut consecutive_failures: u32 = 0;
		let mut pending_delay: Option<Duration> = None;

		loop {
			if let Some(delay) = pending_delay.take() {
				tokio::select! {
					_ = sleep(delay) => {}
					_ = wait_for_shutdown(&mut shutdown_rx) => break,
				}
			}

			generation += 1;
			let (sink, stream) = match connector(url.clone()).await {
				Ok(pair) => pair,
				Err(e) => {
					consecutive_failures = consecutive_failures.saturating_add(1);
					let retry_in = self.cfg.reconnect.delay(consecutive_failures);
					warn!(generation, error = %e, ?retry_in, "pubsub connect failed");
					metrics::counter!("ravenbot_pubsub_reconnects_total", "reason" => "connect_failed").increment(1);
					Self::emit(
						&events_tx,
						PubSubEvent::ConnectFailed {
							attempt: consecutive_failures,
							retry_in,
							error: format!("{e:#}"),
						},
					);
					pending_delay = Some(retry_in);
					continue;
				}
			};

			info!(generation, url = %url, "pubsub socket connected");
			Self::emit(&events_tx, PubSubEvent::Connected { generation });

			match self
				.run_session(generation, sink, stream, &events_tx, &mut shutdown_rx)
				.await
			{
				SessionEnd::Shutdown => break,
				SessionEnd::Reconnect { trigger, healthy } => {
					consecutive_failures = if healthy { 1 } else { consecutive_failures.saturating_add(1) };
					let delay = self.cfg.reconnect.delay(consecutive_failures);
					warn!(generation, %trigger, ?delay, "pubsub session ended; reconnecting");
					metrics::counter!("ravenbot_pubsub_reconnects_total", "reason" => trigger.as_str()).increment(1);
					Self::emit(
						&events_tx,
						PubSubEvent::Reconnecting {
							generation,
							trigger,
							delay,
						},
					);
					pending_delay = Some(delay);
				}
			}
		}

		info!("pubsub client stopped");
		Ok(())
	}

	async fn send_frame(sink: &mut WsSink, frame: &OutboundFrame) -> Result<(), ReconnectTrigger> {
		sink.send(Message::text(frame.to_json()))
			.await
			.map_err(|e| ReconnectTrigger::ConnectionLost(format!("ws write error: {e}")))
	}

	async fn run_session(
		&self,
		generation: u64,
		mut sink: WsSink,
		mut stream: WsStream,
		events_tx: &mpsc::Sender<PubSubEvent>,
		shutdown_rx: &mut ShutdownRx,
	) -> SessionEnd {
		let timing = self.cfg.timing;
		let mut hb = HeartbeatSession::open(generation, &timing, Instant::now());
		let mut healthy = false;

		let listen = OutboundFrame::listen(self.cfg.auth_token.expose(), self.cfg.topics.clone());
		if let Err(trigger) = Self::send_frame(&mut sink, &listen).await {
			return SessionEnd::Reconnect { trigger, healthy };
		}
		debug!(generation, topics = ?self.cfg.topics, "pubsub LISTEN sent");

		loop {
			let pong_deadline = hb.pong_deadline();

			tokio::select! {
				_ = wait_for_shutdown(shutdown_rx) => {
					let _ = sink.close().await;
					return SessionEnd::Shutdown;
				}

				_ = sleep_until(hb.next_ping_at()) => {
					if let Err(trigger) = Self::send_frame(&mut sink, &OutboundFrame::Ping).await {
						return SessionEnd::Reconnect { trigger, healthy };
					}
					let interval = timing.next_ping_interval(&mut rand::rng());
					hb.ping_sent(&timing, Instant::now(), interval);
					metrics::counter!("ravenbot_pubsub_pings_total").increment(1);
					debug!(generation = hb.generation(), next_in = ?interval, "pubsub PING sent");
				}

				_ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
					if hb.pong_overdue(Instant::now()) {
						return SessionEnd::Reconnect { trigger: ReconnectTrigger::PongTimeout, healthy };
					}
				}

				msg = stream.next() => {
					let msg = match msg {
						None => return SessionEnd::Reconnect {
							trigger: ReconnectTrigger::ConnectionLost("ws ended".to_string()),
							healthy,
						},
						Some(Err(e)) => return SessionEnd::Reconnect {
							trigger: ReconnectTrigger::ConnectionLost(format!("ws read error: {e}")),
							healthy,
						},
						Some(Ok(m)) => m,
					};

					match msg {
						Message::Text(t) => {
							healthy = true;
							if let Some(trigger) = Self::handle_frame(&mut hb, t.as_str(), events_tx) {
								return SessionEnd::Reconnect { trigger, healthy };
							}
						}
						Message::Ping(p) => {
							let _ = sink.send(Message::Pong(p)).await;
						}
						Message::Close(frame) => {
							return SessionEnd::Reconnect {
								trigger: ReconnectTrigger::ConnectionLost(format!("ws closed: {frame:?}")),
								healthy,
							};
						}
						_ => {}
					}
				}
			}
		}
	}

	fn handle_frame(
		hb: &mut HeartbeatSession,
		raw: &str,
		events_tx: &mpsc::Sender<PubSubEvent>,
	) -> Option<ReconnectTrigger> {
		let generation = hb.generation();
		match frames::classify(raw) {
			Inbound::Pong => {
				if hb.pong_received() {
					debug!(generation, "pubsub PONG received");
				} else {
					debug!(generation, "pubsub PONG without pending PING");
				}
			}
			Inbound::Reconnect => return Some(ReconnectTrigger::ServerRequested),
			Inbound::Response { error } => {
				match &error {
					Some(e) => warn!(generation, error = %e, "pubsub LISTEN rejected"),
					None => info!(generation, "pubsub subscription active"),
				}
				Self::emit(events_tx, PubSubEvent::Subscribed { generation, error });
			}
			Inbound::StreamUp => {
				info!(generation, "stream went live");
				Self::emit(events_tx, PubSubEvent::StreamUp);
			}
			Inbound::StreamDown => {
				info!(generation, "stream went offline");
				Self::emit(events_tx, PubSubEvent::StreamDown);
			}
			Inbound::Unhandled(payload) => {
				info!(generation, kind = ?payload.kind, "unhandled pubsub payload");
				Self::emit(events_tx, PubSubEvent::Unhandled(payload));
			}
		}
		None
	}
}
