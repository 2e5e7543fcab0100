#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use raven_domain::ChannelName;
use raven_platform::SecretString;
use raven_platform::twitch::{HeartbeatTiming, ReconnectPolicy};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_DISCORD_REPLY: &str =
	"Come and join the Raven's Nest at https://top.gg/servers/299308204393889802 FutureMan";
pub const DEFAULT_SOCIALS_REPLY: &str = "Send photos of food and pictures of pets to 🐘 https://gamepad.club/@ravendwyr or 🐦 https://twitter.com/ravendwyr PizzaTime CoolCat";
pub const DEFAULT_USER_AGENT: &str = "github.com/ravendwyr";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:ravenbot-commands.db";

/// Default config path: `~/.ravenbot/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".ravenbot").join("config.toml"))
}

/// Load the bot config from TOML and env overrides.
pub fn load_bot_config_from_path(path: &Path) -> anyhow::Result<BotConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = BotConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct BotConfig {
	pub bot: BotSettings,
	pub chat: ChatSettings,
	pub pubsub: PubSubSettings,
	pub store: StoreSettings,
	pub lookup: LookupSettings,
	pub debug: DebugSettings,
	pub replies: ReplySettings,
	pub server: ServerSettings,
}

/// Bot account and target channel.
#[derive(Debug, Clone, Default)]
pub struct BotSettings {
	pub username: Option<String>,
	/// Chat password (`oauth:<token>`).
	pub oauth_token: Option<SecretString>,
	pub channel: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatSettings {
	pub ws_url: Option<String>,
	pub reconnect_min_delay: Option<Duration>,
	pub reconnect_max_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct PubSubSettings {
	pub ws_url: Option<String>,
	pub timing: HeartbeatTiming,
	pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
	pub database_url: String,
}

#[derive(Debug, Clone)]
pub struct LookupSettings {
	pub base_url: Option<String>,
	pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct DebugSettings {
	/// Directory for unhandled pubsub payload dumps.
	pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReplySettings {
	pub discord: String,
	pub socials: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

/// Validated credentials needed to go online.
#[derive(Debug, Clone)]
pub struct Identity {
	pub username: String,
	pub oauth_token: SecretString,
	pub channel: ChannelName,
}

impl BotConfig {
	/// Fails with a readable message when a credential is missing.
	pub fn identity(&self) -> anyhow::Result<Identity> {
		let username = self
			.bot
			.username
			.as_deref()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.ok_or_else(|| anyhow!("missing bot.username (or RAVENBOT_BOT_USERNAME)"))?
			.to_ascii_lowercase();

		let token = self
			.bot
			.oauth_token
			.as_ref()
			.filter(|t| !t.is_empty())
			.ok_or_else(|| anyhow!("missing bot.oauth_token (or RAVENBOT_BOT_OAUTH)"))?;
		let token = token.expose().trim();
		let oauth_token = if token.starts_with("oauth:") {
			SecretString::new(token)
		} else {
			SecretString::new(format!("oauth:{token}"))
		};

		let channel = self
			.bot
			.channel
			.as_deref()
			.ok_or_else(|| anyhow!("missing bot.channel (or RAVENBOT_CHANNEL)"))?;
		let channel = ChannelName::new(channel).context("invalid bot.channel")?;

		Ok(Identity {
			username,
			oauth_token,
			channel,
		})
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	bot: FileBotSettings,

	#[serde(default)]
	chat: FileChatSettings,

	#[serde(default)]
	pubsub: FilePubSubSettings,

	#[serde(default)]
	store: FileStoreSettings,

	#[serde(default)]
	lookup: FileLookupSettings,

	#[serde(default)]
	debug: FileDebugSettings,

	#[serde(default)]
	replies: FileReplySettings,

	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBotSettings {
	username: Option<String>,
	oauth_token: Option<SecretString>,
	channel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	ws_url: Option<String>,
	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePubSubSettings {
	ws_url: Option<String>,
	initial_ping_delay_secs: Option<u64>,
	ping_interval_min_secs: Option<u64>,
	ping_interval_max_secs: Option<u64>,
	pong_timeout_secs: Option<u64>,
	reconnect_delay_secs: Option<u64>,
	reconnect_max_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStoreSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLookupSettings {
	base_url: Option<String>,
	user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDebugSettings {
	dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileReplySettings {
	discord: Option<String>,
	socials: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl BotConfig {
	fn from_file(file: FileConfig) -> Self {
		let timing_defaults = HeartbeatTiming::default();
		let reconnect_defaults = ReconnectPolicy::default();
		let secs = |v: Option<u64>, default: Duration| v.map(Duration::from_secs).unwrap_or(default);

		let mut timing = HeartbeatTiming {
			initial_ping_delay: secs(file.pubsub.initial_ping_delay_secs, timing_defaults.initial_ping_delay),
			ping_interval_min: secs(file.pubsub.ping_interval_min_secs, timing_defaults.ping_interval_min),
			ping_interval_max: secs(file.pubsub.ping_interval_max_secs, timing_defaults.ping_interval_max),
			pong_timeout: secs(file.pubsub.pong_timeout_secs, timing_defaults.pong_timeout),
		};
		if timing.ping_interval_min > timing.ping_interval_max {
			warn!(
				min_secs = timing.ping_interval_min.as_secs(),
				max_secs = timing.ping_interval_max.as_secs(),
				"pubsub config: ping_interval_min > ping_interval_max; swapping"
			);
			std::mem::swap(&mut timing.ping_interval_min, &mut timing.ping_interval_max);
		}
		if timing.pong_timeout.is_zero() || timing.pong_timeout >= timing.ping_interval_min {
			let repaired = if timing_defaults.pong_timeout < timing.ping_interval_min {
				timing_defaults.pong_timeout
			} else {
				timing.ping_interval_min / 2
			};
			warn!(
				pong_timeout_secs = timing.pong_timeout.as_secs(),
				min_secs = timing.ping_interval_min.as_secs(),
				repaired_ms = repaired.as_millis() as u64,
				"pubsub config: pong_timeout must be non-zero and shorter than ping_interval_min; clamping"
			);
			timing.pong_timeout = repaired;
		}

		Self {
			bot: BotSettings {
				username: non_empty(file.bot.username),
				oauth_token: file.bot.oauth_token.filter(|t| !t.is_empty()),
				channel: non_empty(file.bot.channel),
			},
			chat: ChatSettings {
				ws_url: non_empty(file.chat.ws_url),
				reconnect_min_delay: file.chat.reconnect_min_delay_ms.map(Duration::from_millis),
				reconnect_max_delay: file.chat.reconnect_max_delay_ms.map(Duration::from_millis),
			},
			pubsub: PubSubSettings {
				ws_url: non_empty(file.pubsub.ws_url),
				timing,
				reconnect: ReconnectPolicy {
					base_delay: secs(file.pubsub.reconnect_delay_secs, reconnect_defaults.base_delay),
					max_delay: file.pubsub.reconnect_max_delay_secs.map(Duration::from_secs),
				},
			},
			store: StoreSettings {
				database_url: non_empty(file.store.database_url).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
			},
			lookup: LookupSettings {
				base_url: non_empty(file.lookup.base_url),
				user_agent: non_empty(file.lookup.user_agent).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
			},
			debug: DebugSettings {
				dir: non_empty(file.debug.dir)
					.map(PathBuf::from)
					.unwrap_or_else(|| PathBuf::from("logs")),
			},
			replies: ReplySettings {
				discord: non_empty(file.replies.discord).unwrap_or_else(|| DEFAULT_DISCORD_REPLY.to_string()),
				socials: non_empty(file.replies.socials).unwrap_or_else(|| DEFAULT_SOCIALS_REPLY.to_string()),
			},
			server: ServerSettings {
				metrics_bind: non_empty(file.server.metrics_bind),
				health_bind: non_empty(file.server.health_bind),
			},
		}
	}
}

impl Default for BotConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut BotConfig) {
	apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from(cfg: &mut BotConfig, var: impl Fn(&str) -> Option<String>) {
	let text = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = text("RAVENBOT_BOT_USERNAME") {
		cfg.bot.username = Some(v);
		info!("bot config: username overridden by env");
	}

	if let Some(v) = text("RAVENBOT_BOT_OAUTH") {
		cfg.bot.oauth_token = Some(SecretString::new(v));
		info!("bot config: oauth_token overridden by env");
	}

	if let Some(v) = text("RAVENBOT_CHANNEL") {
		cfg.bot.channel = Some(v);
		info!("bot config: channel overridden by env");
	}

	if let Some(v) = text("RAVENBOT_DATABASE_URL") {
		cfg.store.database_url = v;
		info!("store config: database_url overridden by env");
	}

	if let Some(v) = text("RAVENBOT_CHAT_WS_URL") {
		cfg.chat.ws_url = Some(v);
		info!("chat config: ws_url overridden by env");
	}

	if let Some(v) = text("RAVENBOT_PUBSUB_WS_URL") {
		cfg.pubsub.ws_url = Some(v);
		info!("pubsub config: ws_url overridden by env");
	}

	if let Some(v) = text("RAVENBOT_PUBSUB_RECONNECT_DELAY_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.pubsub.reconnect.base_delay = Duration::from_secs(secs);
		info!(secs, "pubsub config: reconnect_delay overridden by env");
	}

	if let Some(v) = text("RAVENBOT_PUBSUB_RECONNECT_MAX_DELAY_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.pubsub.reconnect.max_delay = Some(Duration::from_secs(secs));
		info!(secs, "pubsub config: reconnect_max_delay overridden by env");
	}

	if let Some(v) = text("RAVENBOT_LOOKUP_BASE_URL") {
		cfg.lookup.base_url = Some(v);
		info!("lookup config: base_url overridden by env");
	}

	if let Some(v) = text("RAVENBOT_DEBUG_DIR") {
		cfg.debug.dir = PathBuf::from(v);
		info!("debug config: dir overridden by env");
	}

	if let Some(v) = text("RAVENBOT_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = text("RAVENBOT_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let (Some(min), Some(max)) = (cfg.chat.reconnect_min_delay, cfg.chat.reconnect_max_delay)
		&& min > max
	{
		warn!(
			min_ms = min.as_millis(),
			max_ms = max.as_millis(),
			"chat config: reconnect_min_delay > reconnect_max_delay; swapping"
		);
		cfg.chat.reconnect_min_delay = Some(max);
		cfg.chat.reconnect_max_delay = Some(min);
	}

	if let Some(max) = cfg.pubsub.reconnect.max_delay
		&& max <= cfg.pubsub.reconnect.base_delay
	{
		warn!(
			base_secs = cfg.pubsub.reconnect.base_delay.as_secs(),
			max_secs = max.as_secs(),
			"pubsub config: reconnect_max_delay not above reconnect_delay; using fixed delay"
		);
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::io::Write;

	use super::*;

	#[test]
	fn defaults_match_heartbeat_constants() {
		let cfg = BotConfig::default();
		assert_eq!(cfg.pubsub.timing.initial_ping_delay, Duration::from_secs(270));
		assert_eq!(cfg.pubsub.timing.ping_interval_min, Duration::from_secs(240));
		assert_eq!(cfg.pubsub.timing.ping_interval_max, Duration::from_secs(300));
		assert_eq!(cfg.pubsub.timing.pong_timeout, Duration::from_secs(10));
		assert_eq!(cfg.pubsub.reconnect.base_delay, Duration::from_secs(60));
		assert_eq!(cfg.pubsub.reconnect.max_delay, None);
		assert_eq!(cfg.debug.dir, PathBuf::from("logs"));
		assert_eq!(cfg.replies.discord, DEFAULT_DISCORD_REPLY);
		assert!(cfg.identity().is_err());
	}

	#[test]
	fn loads_toml_file() {
		let mut file = tempfile::NamedTempFile::new().expect("tempfile");
		writeln!(
			file,
			r##"
[bot]
username = "RavenBot"
oauth_token = "oauth:abc"
channel = "#RavenDwyr"

[pubsub]
pong_timeout_secs = 5
reconnect_max_delay_secs = 600

[replies]
discord = "join us"
"##
		)
		.expect("write");

		let cfg = BotConfig::from_file(read_toml_if_exists(file.path()).expect("read").expect("present"));
		assert_eq!(cfg.pubsub.timing.pong_timeout, Duration::from_secs(5));
		assert_eq!(cfg.pubsub.reconnect.max_delay, Some(Duration::from_secs(600)));
		assert_eq!(cfg.replies.discord, "join us");
		assert_eq!(cfg.replies.socials, DEFAULT_SOCIALS_REPLY);

		let id = cfg.identity().expect("identity");
		assert_eq!(id.username, "ravenbot");
		assert_eq!(id.channel.as_str(), "ravendwyr");
		assert_eq!(id.oauth_token.expose(), "oauth:abc");
	}

	#[test]
	fn token_is_read_as_secret() {
		let file: FileConfig = toml::from_str(
			r#"
[bot]
username = "ravenbot"
oauth_token = "oauth:hunter2"
channel = "ravendwyr"
"#,
		)
		.expect("parse");
		assert!(!format!("{file:?}").contains("hunter2"));

		let blank: FileConfig = toml::from_str("[bot]\noauth_token = \"  \"\n").expect("parse");
		let cfg = BotConfig::from_file(blank);
		assert!(cfg.bot.oauth_token.is_none());
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let dir = tempfile::tempdir().expect("tempdir");
		assert!(read_toml_if_exists(&dir.path().join("nope.toml")).expect("read").is_none());
	}

	#[test]
	fn env_overrides_take_precedence() {
		let env: HashMap<&str, &str> = HashMap::from([
			("RAVENBOT_BOT_USERNAME", "envbot"),
			("RAVENBOT_BOT_OAUTH", "rawtoken"),
			("RAVENBOT_CHANNEL", "SomeChannel"),
			("RAVENBOT_PUBSUB_RECONNECT_DELAY_SECS", "30"),
			("RAVENBOT_DEBUG_DIR", "  "),
		]);
		let mut cfg = BotConfig::default();
		apply_overrides_from(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

		assert_eq!(cfg.pubsub.reconnect.base_delay, Duration::from_secs(30));
		assert_eq!(cfg.debug.dir, PathBuf::from("logs"));

		let id = cfg.identity().expect("identity");
		assert_eq!(id.username, "envbot");
		assert_eq!(id.channel.as_str(), "somechannel");
		assert_eq!(id.oauth_token.expose(), "oauth:rawtoken");
	}

	#[test]
	fn swapped_ping_window_is_repaired() {
		let file = FileConfig {
			pubsub: FilePubSubSettings {
				ping_interval_min_secs: Some(300),
				ping_interval_max_secs: Some(200),
				..FilePubSubSettings::default()
			},
			..FileConfig::default()
		};
		let cfg = BotConfig::from_file(file);
		assert_eq!(cfg.pubsub.timing.ping_interval_min, Duration::from_secs(200));
		assert_eq!(cfg.pubsub.timing.ping_interval_max, Duration::from_secs(300));
	}

	#[test]
	fn pong_timeout_is_clamped_below_ping_interval() {
		let pubsub = |min, max, pong| FileConfig {
			pubsub: FilePubSubSettings {
				ping_interval_min_secs: Some(min),
				ping_interval_max_secs: Some(max),
				pong_timeout_secs: Some(pong),
				..FilePubSubSettings::default()
			},
			..FileConfig::default()
		};

		let cfg = BotConfig::from_file(pubsub(5, 6, 10));
		assert_eq!(cfg.pubsub.timing.pong_timeout, Duration::from_millis(2500));

		let cfg = BotConfig::from_file(pubsub(60, 90, 0));
		assert_eq!(cfg.pubsub.timing.pong_timeout, Duration::from_secs(10));

		let cfg = BotConfig::from_file(pubsub(60, 90, 20));
		assert_eq!(cfg.pubsub.timing.pong_timeout, Duration::from_secs(20));
	}
}
