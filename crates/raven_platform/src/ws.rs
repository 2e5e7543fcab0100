#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use url::Url;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a WebSocket connection.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Read half of a WebSocket connection.
pub type WsStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Opens a WebSocket; swapped out in tests for an in-memory pair.
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<(WsSink, WsStream)>> + Send + Sync>;

async fn connect_tls_ws(url: Url) -> anyhow::Result<(WsSink, WsStream)> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.with_context(|| format!("connect_async to {url}"))?;
	let (sink, stream) = ws.split();
	Ok((Box::pin(sink), Box::pin(stream)))
}

/// Connector backed by `tokio_tungstenite::connect_async`.
pub fn default_ws_connector() -> WsConnector {
	Arc::new(|url: Url| Box::pin(connect_tls_ws(url)) as BoxFuture<'static, anyhow::Result<(WsSink, WsStream)>>)
}
