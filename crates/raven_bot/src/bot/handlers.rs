#![forbid(unsafe_code)]

//! Built-in command handlers.

use raven_platform::ChatMessage;
use raven_platform::lookup::LastGame;
use tracing::{info, warn};

use super::dispatcher::BotContext;
use super::registry::BuiltinKind;

pub const STORE_ERROR_REPLY: &str = "Something went wrong while talking to my database. NotLikeThis";

/// Which custom-command mutation is running; picks the wording of rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
	Add,
	Edit,
	Delete,
}

impl Mutation {
	fn usage(self) -> &'static str {
		match self {
			Mutation::Add => "Usage: !addcom !name reply text PunOko",
			Mutation::Edit => "Usage: !editcom !name reply text PunOko",
			Mutation::Delete => "Usage: !delcom !name PunOko",
		}
	}

	fn hardcoded_verb(self) -> &'static str {
		match self {
			Mutation::Add => "added",
			Mutation::Edit => "changed",
			Mutation::Delete => "deleted",
		}
	}

	fn done_verb(self) -> &'static str {
		match self {
			Mutation::Add => "added",
			Mutation::Edit => "updated",
			Mutation::Delete => "deleted",
		}
	}
}

/// Reply-body rule shared by add and edit.
fn check_body(body: &str) -> Result<(), &'static str> {
	if body.starts_with('!') {
		return Err("The command output cannot start with an exclamation point! PunOko");
	}
	if body.is_empty() {
		return Err("The command output cannot be empty! PunOko");
	}
	Ok(())
}

/// Strip one leading `@` from a shoutout target.
pub fn shoutout_target(arg: &str) -> &str {
	arg.strip_prefix('@').unwrap_or(arg)
}

pub fn shoutout_reply(streamer: &str, result: &anyhow::Result<LastGame>) -> String {
	let login = streamer.to_lowercase();
	match result {
		Ok(LastGame::NotFound) => format!("I cannot find a streamer named @{streamer}! NotLikeThis"),
		Ok(LastGame::Game(game)) => format!(
			"Check out @{streamer} over at https://www.twitch.tv/{login} - they were last seen streaming {game} imGlitch"
		),
		Ok(LastGame::NoGame) => format!("Check out @{streamer} over at https://www.twitch.tv/{login} imGlitch"),
		Err(_) => format!("I couldn't reach the lookup service to shout out @{streamer}. NotLikeThis"),
	}
}

pub fn farewell(display_name: &str) -> String {
	format!(
		"I'm afraid. I'm afraid, {display_name}. My mind is going. There is no question about it. I can feel it. I'm a... fraid... BibleThump"
	)
}

impl BotContext {
	pub(super) async fn run_builtin(&self, kind: BuiltinKind, args: &[&str], msg: &ChatMessage) {
		match kind {
			BuiltinKind::Commands => self.list_commands().await,
			BuiltinKind::Discord => self.say(&self.replies.discord).await,
			BuiltinKind::Socials => self.say(&self.replies.socials).await,
			BuiltinKind::Shoutout => self.shoutout(args).await,
			BuiltinKind::AddCom => self.mutate(Mutation::Add, args).await,
			BuiltinKind::EditCom => self.mutate(Mutation::Edit, args).await,
			BuiltinKind::DelCom => self.mutate(Mutation::Delete, args).await,
			BuiltinKind::Shutdown => self.shutdown(msg).await,
		}
	}

	async fn list_commands(&self) {
		let custom = match self.store.list_all().await {
			Ok(all) => all,
			Err(e) => {
				warn!(error = %e, "list custom commands failed");
				self.say(STORE_ERROR_REPLY).await;
				return;
			}
		};

		let mut names: Vec<&str> = self.registry.public_names().collect();
		names.extend(custom.keys().map(String::as_str).filter(|k| !self.registry.is_builtin(k)));
		self.say(&format!("Public bot commands: {}", names.join(" "))).await;
	}

	async fn shoutout(&self, args: &[&str]) {
		let streamer = args.first().map(|a| shoutout_target(a)).unwrap_or_default();
		if streamer.is_empty() {
			self.say("I can't do a shoutout if you don't give me a name! PunOko").await;
			return;
		}

		let result = self.lookup.last_game(&streamer.to_lowercase()).await;
		if let Err(e) = &result {
			warn!(streamer, error = %e, "shoutout lookup failed");
		}
		self.say(&shoutout_reply(streamer, &result)).await;
	}

	async fn mutate(&self, op: Mutation, args: &[&str]) {
		let Some(&name) = args.first() else {
			self.say(op.usage()).await;
			return;
		};
		let body = args[1..].join(" ");

		if self.registry.is_builtin(name) {
			self.say(&format!(
				"The command {name} is hardcoded into my database and cannot be {}. MrDestructoid",
				op.hardcoded_verb()
			))
			.await;
			return;
		}

		let _guard = self.mutations.lock().await;

		let exists = match self.store.get(name).await {
			Ok(v) => v.is_some(),
			Err(e) => {
				warn!(command = name, error = %e, "custom command read failed");
				self.say(STORE_ERROR_REPLY).await;
				return;
			}
		};

		let reply = match op {
			Mutation::Add => {
				if exists {
					self.say(&format!("The command {name} already exists! PunOko")).await;
					return;
				}
				if name.len() < 2 || !name.starts_with('!') {
					self.say("The command name must start with an exclamation point! PunOko").await;
					return;
				}
				if let Err(rejection) = check_body(&body) {
					self.say(rejection).await;
					return;
				}
				self.store.set(name, &body).await
			}
			Mutation::Edit => {
				if !exists {
					self.say(&format!("The command {name} does not exist! PunOko")).await;
					return;
				}
				if let Err(rejection) = check_body(&body) {
					self.say(rejection).await;
					return;
				}
				self.store.set(name, &body).await
			}
			Mutation::Delete => {
				if !exists {
					self.say(&format!("The command {name} does not exist! PunOko")).await;
					return;
				}
				self.store.delete(name).await.map(|_| ())
			}
		};

		match reply {
			Ok(()) => {
				info!(command = name, op = ?op, "custom command changed");
				self.say(&format!("The command {name} has been successfully {}. VoHiYo", op.done_verb()))
					.await;
			}
			Err(e) => {
				warn!(command = name, error = %e, "custom command write failed");
				self.say(STORE_ERROR_REPLY).await;
			}
		}
	}

	async fn shutdown(&self, msg: &ChatMessage) {
		self.say(&farewell(msg.author.display_or_login())).await;
		tokio::time::sleep(self.shutdown_grace).await;
		info!(by = %msg.author.login, "shutdown requested from chat");
		if let Err(e) = self.shutdown_tx.send(true) {
			warn!(error = %e, "shutdown signal has no listeners");
		}
	}
}
