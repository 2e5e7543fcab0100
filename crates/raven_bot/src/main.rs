#![forbid(unsafe_code)]

mod bot;
mod config;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use raven_platform::lookup::DecApiLookup;
use raven_platform::twitch::{PubSubClient, PubSubConfig, TwitchChatClient, TwitchChatConfig};
use raven_platform::{ChatSink, shutdown_channel};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::bot::debug_dump::DebugDumper;
use crate::bot::{Bot, BotContext, CommandRegistry, Dispatcher};
use crate::config::BotConfig;
use crate::server::health::{HealthState, spawn_health_server};
use crate::store::{CommandStore, InMemoryCommandStore, SqliteCommandStore};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: ravenbot [--config path/to/config.toml]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.ravenbot/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter =
		std::env::var("RUST_LOG").unwrap_or_else(|_| "info,raven_bot=debug,raven_platform=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("ravenbot");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn open_store(database_url: &str) -> anyhow::Result<Arc<dyn CommandStore>> {
	if database_url == "memory" {
		warn!("custom commands are kept in memory and will not survive a restart");
		return Ok(Arc::new(InMemoryCommandStore::new()));
	}
	let store = SqliteCommandStore::connect(database_url)
		.await
		.with_context(|| format!("open command store {database_url}"))?;
	Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let cfg: BotConfig = crate::config::load_bot_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded bot config (toml + env overrides)");
	let identity = cfg.identity()?;

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => match spawn_health_server(addr, health_state.clone()).await {
				Ok(local) => info!(addr = %local, "health server listening"),
				Err(e) => warn!(error = %e, "health server failed to start"),
			},
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let store = open_store(&cfg.store.database_url).await?;
	let (shutdown_tx, shutdown_rx) = shutdown_channel();

	let mut chat_cfg = TwitchChatConfig::new(
		identity.username.clone(),
		identity.oauth_token.clone(),
		identity.channel.clone(),
	);
	if let Some(url) = cfg.chat.ws_url.clone() {
		chat_cfg.ws_url = url;
	}
	if let Some(min) = cfg.chat.reconnect_min_delay {
		chat_cfg.reconnect_min_delay = min;
	}
	if let Some(max) = cfg.chat.reconnect_max_delay {
		chat_cfg.reconnect_max_delay = max;
	}
	let (chat_handle, chat_rx, chat_task) = TwitchChatClient::new(chat_cfg).spawn(shutdown_rx.clone());

	let mut pubsub_cfg = PubSubConfig::new(&identity.channel, &identity.oauth_token);
	if let Some(url) = cfg.pubsub.ws_url.clone() {
		pubsub_cfg.ws_url = url;
	}
	pubsub_cfg.timing = cfg.pubsub.timing;
	pubsub_cfg.reconnect = cfg.pubsub.reconnect;
	let (pubsub_rx, pubsub_task) = PubSubClient::new(pubsub_cfg).spawn(shutdown_rx.clone(), 64);

	let lookup = DecApiLookup::new(
		cfg.lookup
			.base_url
			.clone()
			.unwrap_or_else(|| DecApiLookup::DEFAULT_BASE_URL.to_string()),
		cfg.lookup.user_agent.clone(),
	);

	let chat: Arc<dyn ChatSink> = Arc::new(chat_handle);
	let ctx = BotContext::new(
		identity.channel.clone(),
		&identity.username,
		CommandRegistry::with_builtins()?,
		store,
		chat,
		Arc::new(lookup),
		cfg.replies.clone(),
		shutdown_tx.clone(),
	);
	let bot = Bot::new(
		Dispatcher::new(ctx),
		DebugDumper::new(cfg.debug.dir.clone()),
		health_state,
	);

	{
		let shutdown_tx = shutdown_tx.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				info!("ctrl-c received; shutting down");
				let _ = shutdown_tx.send(true);
			}
		});
	}

	info!(channel = %identity.channel, bot = %identity.username, "ravenbot starting");
	let result = bot.run(chat_rx, pubsub_rx, shutdown_rx).await;
	let _ = shutdown_tx.send(true);

	for (name, task) in [("chat", chat_task), ("pubsub", pubsub_task)] {
		match tokio::time::timeout(Duration::from_secs(5), task).await {
			Ok(Ok(Ok(()))) => {}
			Ok(Ok(Err(e))) => warn!(client = name, error = %e, "client exited with error"),
			Ok(Err(e)) => warn!(client = name, error = %e, "client task panicked"),
			Err(_) => warn!(client = name, "client did not stop in time"),
		}
	}

	info!("ravenbot stopped");
	result
}
