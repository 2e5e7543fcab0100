#![forbid(unsafe_code)]

pub mod announce;
pub mod debug_dump;
pub mod dispatcher;
mod handlers;
pub mod registry;


use raven_platform::twitch::PubSubEvent;
use raven_platform::{ChatEvent, ShutdownRx, wait_for_shutdown};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use dispatcher::{BotContext, Dispatcher};
pub use registry::CommandRegistry;

use self::debug_dump::DebugDumper;
use crate::server::health::HealthState;

/// Event loop tying chat, pubsub and the dispatcher together.
pub struct Bot {
	dispatcher: Dispatcher,
	dumper: DebugDumper,
	health: HealthState,
}

impl Bot {
	pub fn new(dispatcher: Dispatcher, dumper: DebugDumper, health: HealthState) -> Self {
		Self {
			dispatcher,
			dumper,
			health,
		}
	}

	pub fn handle_chat_event(&self, event: ChatEvent) {
		match event {
			ChatEvent::Connected { server } => info!(%server, "twitch bot connected"),
			ChatEvent::Joined { channel } => {
				info!(%channel, "joined channel");
				self.health.mark_ready();
			}
			ChatEvent::Message(msg) => {
				self.dispatcher.spawn_dispatch(*msg);
			}
			ChatEvent::Notice { msg_id, text, .. } => {
				info!(msg_id = msg_id.as_deref().unwrap_or("-"), "NOTICE - {text}");
			}
			ChatEvent::Disconnected { reason, retry_in } => {
				warn!(%reason, ?retry_in, "chat disconnected");
				self.health.mark_not_ready();
			}
		}
	}

	pub async fn handle_pubsub_event(&self, event: PubSubEvent) {
		if let PubSubEvent::Unhandled(payload) = &event {
			self.dumper.dump(payload).await;
			return;
		}
		if let Some(text) = announce::announcement(&event) {
			self.dispatcher.context().say(&text).await;
		} else {
			debug!(?event, "pubsub event");
		}
	}

	pub async fn run(
		self,
		mut chat_rx: mpsc::Receiver<ChatEvent>,
		mut pubsub_rx: mpsc::Receiver<PubSubEvent>,
		mut shutdown_rx: ShutdownRx,
	) -> anyhow::Result<()> {
		let mut pubsub_open = true;
		loop {
			tokio::select! {
				_ = wait_for_shutdown(&mut shutdown_rx) => break,
				ev = chat_rx.recv() => match ev {
					Some(ev) => self.handle_chat_event(ev),
					None => {
						warn!("chat client stopped; leaving event loop");
						break;
					}
				},
				ev = pubsub_rx.recv(), if pubsub_open => match ev {
					Some(ev) => self.handle_pubsub_event(ev).await,
					None => {
						warn!("pubsub client stopped");
						pubsub_open = false;
					}
				},
			}
		}
		Ok(())
	}
}
