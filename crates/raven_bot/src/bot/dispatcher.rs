#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use raven_domain::{ChannelName, Role, Tier};
use raven_platform::lookup::GameLookup;
use raven_platform::{ChatMessage, ChatSink, ShutdownTx};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handlers::STORE_ERROR_REPLY;
use super::registry::{BuiltinKind, CommandRegistry};
use crate::config::ReplySettings;
use crate::store::CommandStore;

/// A `!command arg...` line split on whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<'a> {
	pub name: &'a str,
	pub args: Vec<&'a str>,
}

pub fn parse_invocation(text: &str) -> Option<Invocation<'_>> {
	if !text.starts_with('!') {
		return None;
	}
	let mut tokens = text.split_whitespace();
	let name = tokens.next()?;
	Some(Invocation {
		name,
		args: tokens.collect(),
	})
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// Echo of the bot's own line.
	OwnMessage,
	NotACommand,
	Builtin(BuiltinKind),
	Custom,
	Unknown,
}

/// Everything a handler needs.
pub struct BotContext {
	pub channel: ChannelName,
	/// Lower-case login of the bot account.
	pub bot_login: String,
	pub registry: CommandRegistry,
	pub store: Arc<dyn CommandStore>,
	pub chat: Arc<dyn ChatSink>,
	pub lookup: Arc<dyn GameLookup>,
	pub replies: ReplySettings,
	pub shutdown_tx: ShutdownTx,
	/// Time between the farewell and the shutdown signal.
	pub shutdown_grace: Duration,
	/// Held across the check-then-write sequences of custom command edits.
	pub(super) mutations: Mutex<()>,
}

impl BotContext {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		channel: ChannelName,
		bot_login: &str,
		registry: CommandRegistry,
		store: Arc<dyn CommandStore>,
		chat: Arc<dyn ChatSink>,
		lookup: Arc<dyn GameLookup>,
		replies: ReplySettings,
		shutdown_tx: ShutdownTx,
	) -> Self {
		Self {
			channel,
			bot_login: bot_login.trim().to_ascii_lowercase(),
			registry,
			store,
			chat,
			lookup,
			replies,
			shutdown_tx,
			shutdown_grace: Duration::from_millis(500),
			mutations: Mutex::new(()),
		}
	}

	/// Send to the configured channel; failures are logged.
	pub async fn say(&self, text: &str) {
		if let Err(e) = self.chat.say(&self.channel, text).await {
			warn!(error = %e, "chat say failed");
		}
	}
}

/// Routes chat lines to built-in handlers or stored replies.
#[derive(Clone)]
pub struct Dispatcher {
	ctx: Arc<BotContext>,
}

impl Dispatcher {
	pub fn new(ctx: BotContext) -> Self {
		Self { ctx: Arc::new(ctx) }
	}

	pub fn context(&self) -> &BotContext {
		&self.ctx
	}

	/// Handle a message on its own task so slow lookups never hold up the event loop.
	pub fn spawn_dispatch(&self, msg: ChatMessage) -> JoinHandle<()> {
		let this = self.clone();
		tokio::spawn(async move {
			let outcome = this.dispatch(&msg).await;
			debug!(author = %msg.author.login, ?outcome, "dispatched");
		})
	}

	pub async fn dispatch(&self, msg: &ChatMessage) -> DispatchOutcome {
		let ctx = &*self.ctx;
		if msg.is_self || msg.author.login.eq_ignore_ascii_case(&ctx.bot_login) {
			return DispatchOutcome::OwnMessage;
		}

		let Some(inv) = parse_invocation(&msg.text) else {
			return DispatchOutcome::NotACommand;
		};

		let role = Role::from_badges(msg.badges);
		if let Some(cmd) = ctx.registry.resolve(inv.name, role) {
			let kind = cmd.kind;
			metrics::counter!("ravenbot_commands_dispatched_total", "tier" => cmd.tier.as_str()).increment(1);
			debug!(command = inv.name, %role, tier = %cmd.tier, "builtin command");
			ctx.run_builtin(kind, &inv.args, msg).await;
			return DispatchOutcome::Builtin(kind);
		}

		// A stored key shadowing a built-in is never answered, whatever the issuer's role.
		if ctx.registry.is_builtin(inv.name) {
			return DispatchOutcome::Unknown;
		}

		match ctx.store.get(inv.name).await {
			Ok(Some(reply)) => {
				metrics::counter!("ravenbot_commands_dispatched_total", "tier" => Tier::Custom.as_str()).increment(1);
				ctx.say(&reply).await;
				DispatchOutcome::Custom
			}
			Ok(None) => DispatchOutcome::Unknown,
			Err(e) => {
				warn!(command = inv.name, error = %e, "custom command lookup failed");
				ctx.say(STORE_ERROR_REPLY).await;
				DispatchOutcome::Unknown
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn parses_command_and_args() {
		let inv = parse_invocation("!addcom  !greet hello   there").expect("command");
		assert_eq!(inv.name, "!addcom");
		assert_eq!(inv.args, vec!["!greet", "hello", "there"]);

		assert_eq!(parse_invocation("hello !so"), None);
		assert_eq!(parse_invocation(" !so"), None);
		assert_eq!(parse_invocation("!").map(|i| i.name), Some("!"));
	}

	proptest! {
		#[test]
		fn tokens_never_contain_whitespace(text in "![a-z]{1,8}( +[ -~]{0,12}){0,4}") {
			let inv = parse_invocation(&text).expect("starts with bang");
			prop_assert!(inv.name.starts_with('!'));
			for t in std::iter::once(inv.name).chain(inv.args.iter().copied()) {
				prop_assert!(!t.is_empty());
				prop_assert!(!t.chars().any(char::is_whitespace));
			}
		}
	}
}
