#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use raven_domain::ChannelName;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::irc::{self, IrcMessage};
use crate::ws::{WsConnector, WsSink, WsStream, default_ws_connector};
use crate::{
	ChatEvent, ChatMessage, ChatSink, SecretString, ShutdownRx, UserRef, backoff_delay, new_session_id,
	wait_for_shutdown,
};

/// Twitch chat (IRC over WebSocket) configuration.
#[derive(Clone)]
pub struct TwitchChatConfig {
	pub ws_url: String,
	/// Bot account login.
	pub username: String,
	/// `oauth:<token>` chat password.
	pub oauth_token: SecretString,
	pub channel: ChannelName,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
	/// No inbound traffic for this long means the socket is dead (Twitch PINGs every ~5 minutes).
	pub idle_timeout: Duration,
	pub outbound_capacity: usize,
	pub events_capacity: usize,
	pub ws_connector: Option<WsConnector>,
}

impl TwitchChatConfig {
	pub fn new(username: impl Into<String>, oauth_token: SecretString, channel: ChannelName) -> Self {
		Self {
			ws_url: "wss://irc-ws.chat.twitch.tv:443".to_string(),
			username: username.into(),
			oauth_token,
			channel,
			reconnect_min_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(60),
			idle_timeout: Duration::from_secs(6 * 60),
			outbound_capacity: 64,
			events_capacity: 256,
			ws_connector: None,
		}
	}
}

#[derive(Debug)]
enum ChatControl {
	Say { channel: ChannelName, text: String },
}

/// Cheap, cloneable handle for sending chat lines.
#[derive(Debug, Clone)]
pub struct ChatHandle {
	tx: mpsc::Sender<ChatControl>,
}

#[async_trait::async_trait]
impl ChatSink for ChatHandle {
	async fn say(&self, channel: &ChannelName, text: &str) -> anyhow::Result<()> {
		self.tx
			.send(ChatControl::Say {
				channel: channel.clone(),
				text: text.to_string(),
			})
			.await
			.map_err(|_| anyhow!("chat transport stopped"))
	}
}

enum SessionEnd {
	Shutdown,
	Reconnect { reason: String, logged_in: bool },
}

/// Twitch chat client with a reconnecting run loop.
pub struct TwitchChatClient {
	cfg: TwitchChatConfig,
}

impl TwitchChatClient {
	pub fn new(cfg: TwitchChatConfig) -> Self {
		Self { cfg }
	}

	/// Spawn the run loop. Lines passed to the handle while disconnected are
	/// queued and sent once the next session is up.
	pub fn spawn(self, shutdown_rx: ShutdownRx) -> (ChatHandle, mpsc::Receiver<ChatEvent>, JoinHandle<anyhow::Result<()>>) {
		let (control_tx, control_rx) = mpsc::channel(self.cfg.outbound_capacity.max(1));
		let (events_tx, events_rx) = mpsc::channel(self.cfg.events_capacity.max(1));
		let task = tokio::spawn(self.run_loop(control_rx, events_tx, shutdown_rx));
		(ChatHandle { tx: control_tx }, events_rx, task)
	}

	fn ws_connector(&self) -> WsConnector {
		self.cfg.ws_connector.clone().unwrap_or_else(default_ws_connector)
	}

	fn is_own_login(&self, login: &str) -> bool {
		login.eq_ignore_ascii_case(self.cfg.username.trim())
	}

	async fn run_loop(
		self,
		mut control_rx: mpsc::Receiver<ChatControl>,
		events_tx: mpsc::Sender<ChatEvent>,
		mut shutdown_rx: ShutdownRx,
	) -> anyhow::Result<()> {
		let url = Url::parse(&self.cfg.ws_url).context("parse chat ws url")?;
		let connector = self.ws_connector();
		let mut reconnect_attempt: u32 = 0;

		loop {
			if reconnect_attempt > 0 {
				let delay = backoff_delay(
					reconnect_attempt - 1,
					self.cfg.reconnect_min_delay,
					self.cfg.reconnect_max_delay,
				);
				tokio::select! {
					_ = sleep(delay) => {}
					_ = wait_for_shutdown(&mut shutdown_rx) => break,
				}
			}

			let session_id = new_session_id();
			let (sink, stream) = match connector(url.clone()).await {
				Ok(pair) => pair,
				Err(e) => {
					reconnect_attempt = reconnect_attempt.saturating_add(1);
					let retry_in = backoff_delay(
						reconnect_attempt - 1,
						self.cfg.reconnect_min_delay,
						self.cfg.reconnect_max_delay,
					);
					warn!(error = %e, ?retry_in, "chat connect failed");
					let _ = events_tx.try_send(ChatEvent::Disconnected {
						reason: format!("connect failed: {e:#}"),
						retry_in,
					});
					continue;
				}
			};

			info!(%session_id, channel = %self.cfg.channel, "chat socket connected");
			match self
				.run_session(sink, stream, &mut control_rx, &events_tx, &mut shutdown_rx)
				.await
			{
				SessionEnd::Shutdown => break,
				SessionEnd::Reconnect { reason, logged_in } => {
					reconnect_attempt = if logged_in { 1 } else { reconnect_attempt.saturating_add(1) };
					let retry_in = backoff_delay(
						reconnect_attempt - 1,
						self.cfg.reconnect_min_delay,
						self.cfg.reconnect_max_delay,
					);
					warn!(%session_id, %reason, ?retry_in, "chat session ended");
					metrics::counter!("ravenbot_chat_reconnects_total").increment(1);
					let _ = events_tx.try_send(ChatEvent::Disconnected { reason, retry_in });
				}
			}
		}

		info!("chat client stopped");
		Ok(())
	}

	async fn send_line(sink: &mut WsSink, line: String) -> Result<(), String> {
		sink.send(Message::text(line))
			.await
			.map_err(|e| format!("chat ws write error: {e}"))
	}

	async fn run_session(
		&self,
		mut sink: WsSink,
		mut stream: WsStream,
		control_rx: &mut mpsc::Receiver<ChatControl>,
		events_tx: &mpsc::Sender<ChatEvent>,
		shutdown_rx: &mut ShutdownRx,
	) -> SessionEnd {
		let nick = self.cfg.username.trim().to_ascii_lowercase();
		let handshake = [
			"CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
			format!("PASS {}", self.cfg.oauth_token.expose()),
			format!("NICK {nick}"),
			format!("JOIN {}", self.cfg.channel.irc()),
		];
		for line in handshake {
			if let Err(reason) = Self::send_line(&mut sink, line).await {
				return SessionEnd::Reconnect {
					reason,
					logged_in: false,
				};
			}
		}

		let mut logged_in = false;
		let mut last_activity = Instant::now();

		loop {
			tokio::select! {
				_ = wait_for_shutdown(shutdown_rx) => {
					let _ = Self::send_line(&mut sink, format!("PART {}", self.cfg.channel.irc())).await;
					let _ = sink.close().await;
					return SessionEnd::Shutdown;
				}

				Some(ctrl) = control_rx.recv(), if logged_in => {
					match ctrl {
						ChatControl::Say { channel, text } => {
							debug!(%channel, "chat say");
							if let Err(reason) = Self::send_line(&mut sink, irc::privmsg(&channel.irc(), &text)).await {
								return SessionEnd::Reconnect { reason, logged_in };
							}
						}
					}
				}

				msg = stream.next() => {
					let msg = match msg {
						None => return SessionEnd::Reconnect { reason: "chat ws ended".to_string(), logged_in },
						Some(Err(e)) => return SessionEnd::Reconnect { reason: format!("chat ws read error: {e}"), logged_in },
						Some(Ok(m)) => m,
					};
					last_activity = Instant::now();

					match msg {
						Message::Text(t) => {
							for line in t.as_str().split("\r\n").filter(|l| !l.trim().is_empty()) {
								let parsed = match IrcMessage::parse(line) {
									Ok(m) => m,
									Err(e) => {
										debug!(error = %e, %line, "unparseable chat line");
										continue;
									}
								};

								match self.handle_line(parsed, events_tx) {
									LineAction::None => {}
									LineAction::LoggedIn => logged_in = true,
									LineAction::Reply(reply) => {
										if let Err(reason) = Self::send_line(&mut sink, reply).await {
											return SessionEnd::Reconnect { reason, logged_in };
										}
									}
									LineAction::Reconnect(reason) => return SessionEnd::Reconnect { reason, logged_in },
								}
							}
						}
						Message::Ping(p) => {
							let _ = sink.send(Message::Pong(p)).await;
						}
						Message::Close(frame) => {
							return SessionEnd::Reconnect { reason: format!("chat ws closed: {frame:?}"), logged_in };
						}
						_ => {}
					}
				}

				_ = sleep(self.cfg.idle_timeout) => {
					if last_activity.elapsed() >= self.cfg.idle_timeout {
						return SessionEnd::Reconnect { reason: "chat idle watchdog triggered".to_string(), logged_in };
					}
				}
			}
		}
	}

	fn handle_line(&self, msg: IrcMessage, events_tx: &mpsc::Sender<ChatEvent>) -> LineAction {
		match msg.command.as_str() {
			"PING" => {
				let token = msg.param(0).unwrap_or("tmi.twitch.tv");
				LineAction::Reply(format!("PONG :{token}"))
			}
			"001" => {
				let server = msg.prefix.clone().unwrap_or_default();
				let _ = events_tx.try_send(ChatEvent::Connected { server });
				LineAction::LoggedIn
			}
			"JOIN" => {
				if msg.nick().is_some_and(|n| self.is_own_login(n))
					&& let Some(channel) = msg.param(0).and_then(|c| ChannelName::new(c).ok())
				{
					let _ = events_tx.try_send(ChatEvent::Joined { channel });
				}
				LineAction::None
			}
			"PRIVMSG" => {
				if let Some(chat) = self.chat_message_from(&msg) {
					metrics::counter!("ravenbot_chat_messages_total").increment(1);
					if events_tx.try_send(ChatEvent::Message(Box::new(chat))).is_err() {
						warn!("chat event queue full; dropping message");
					}
				}
				LineAction::None
			}
			"NOTICE" => {
				let text = msg.params.last().cloned().unwrap_or_default();
				let channel = msg.param(0).filter(|c| c.starts_with('#')).map(str::to_string);
				let msg_id = msg.tag("msg-id").map(str::to_string);
				let _ = events_tx.try_send(ChatEvent::Notice {
					channel,
					msg_id,
					text: text.clone(),
				});
				if text.contains("Login authentication failed") || text.contains("Improperly formatted auth") {
					return LineAction::Reconnect(format!("chat login rejected: {text}"));
				}
				LineAction::None
			}
			"RECONNECT" => LineAction::Reconnect("server requested reconnect".to_string()),
			_ => LineAction::None,
		}
	}

	fn chat_message_from(&self, msg: &IrcMessage) -> Option<ChatMessage> {
		let channel = ChannelName::new(msg.param(0)?).ok()?;
		let text = msg.param(1)?.to_string();
		let login = msg
			.nick()
			.map(str::to_string)
			.or_else(|| msg.tag("login").map(str::to_string))?;
		let display = msg.tag("display-name").filter(|d| !d.is_empty()).map(str::to_string);

		Some(ChatMessage {
			channel,
			badges: irc::badges_from_tags(msg),
			is_self: self.is_own_login(&login),
			author: UserRef { login, display },
			text,
			message_id: msg.tag("id").map(str::to_string),
		})
	}
}

enum LineAction {
	None,
	LoggedIn,
	Reply(String),
	Reconnect(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	fn client() -> TwitchChatClient {
		TwitchChatClient::new(TwitchChatConfig::new(
			"RavenBot",
			SecretString::new("oauth:token"),
			ChannelName::new("ravendwyr").unwrap(),
		))
	}

	#[test]
	fn privmsg_becomes_chat_message_with_badges() {
		let c = client();
		let line = "@badges=moderator/1;display-name=SomeMod;id=m-1 :somemod!somemod@somemod.tmi.twitch.tv PRIVMSG #ravendwyr :!so friend";
		let msg = IrcMessage::parse(line).unwrap();
		let chat = c.chat_message_from(&msg).expect("chat message");

		assert_eq!(chat.channel.as_str(), "ravendwyr");
		assert_eq!(chat.author.login, "somemod");
		assert_eq!(chat.author.display.as_deref(), Some("SomeMod"));
		assert!(chat.badges.moderator);
		assert!(!chat.badges.broadcaster);
		assert!(!chat.is_self);
		assert_eq!(chat.text, "!so friend");
		assert_eq!(chat.message_id.as_deref(), Some("m-1"));
	}

	#[test]
	fn own_account_is_flagged_self() {
		let c = client();
		let msg = IrcMessage::parse(":ravenbot!ravenbot@ravenbot.tmi.twitch.tv PRIVMSG #ravendwyr :!commands").unwrap();
		assert!(c.chat_message_from(&msg).expect("chat message").is_self);
	}

	#[tokio::test]
	async fn ping_is_answered_and_welcome_marks_login() {
		let c = client();
		let (tx, mut rx) = mpsc::channel(8);

		match c.handle_line(IrcMessage::parse("PING :tmi.twitch.tv").unwrap(), &tx) {
			LineAction::Reply(r) => assert_eq!(r, "PONG :tmi.twitch.tv"),
			_ => panic!("expected PONG reply"),
		}

		assert!(matches!(
			c.handle_line(IrcMessage::parse(":tmi.twitch.tv 001 ravenbot :Welcome, GLHF!").unwrap(), &tx),
			LineAction::LoggedIn
		));
		assert!(matches!(rx.recv().await, Some(ChatEvent::Connected { .. })));
	}

	#[tokio::test]
	async fn notice_is_forwarded_and_auth_failure_reconnects() {
		let c = client();
		let (tx, mut rx) = mpsc::channel(8);

		let action = c.handle_line(
			IrcMessage::parse(":tmi.twitch.tv NOTICE * :Login authentication failed").unwrap(),
			&tx,
		);
		assert!(matches!(action, LineAction::Reconnect(_)));
		match rx.recv().await {
			Some(ChatEvent::Notice { channel, text, .. }) => {
				assert_eq!(channel, None);
				assert_eq!(text, "Login authentication failed");
			}
			other => panic!("expected notice, got {other:?}"),
		}
	}

	#[test]
	fn server_reconnect_command_ends_session() {
		let c = client();
		let (tx, _rx) = mpsc::channel(8);
		assert!(matches!(
			c.handle_line(IrcMessage::parse(":tmi.twitch.tv RECONNECT").unwrap(), &tx),
			LineAction::Reconnect(_)
		));
	}
}
