#![forbid(unsafe_code)]

//! Unhandled pubsub payloads written to disk for later inspection.

use std::path::PathBuf;

use anyhow::Context;
use raven_platform::twitch::{UnhandledKind, UnhandledPayload};
use tracing::{info, warn};

/// Keep file names to a safe alphabet.
fn sanitize(discriminator: &str) -> String {
	let cleaned: String = discriminator
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
				c
			} else {
				'_'
			}
		})
		.take(64)
		.collect();
	if cleaned.is_empty() { "undefined".to_string() } else { cleaned }
}

pub fn dump_file_name(kind: &UnhandledKind) -> String {
	match kind {
		UnhandledKind::ControlType(t) => format!("payload-type-{}.json", sanitize(t)),
		UnhandledKind::MessageType(t) => format!("payload-message-{}.json", sanitize(t)),
		UnhandledKind::Unknown => "payload-unknown.json".to_string(),
		UnhandledKind::Malformed => "payload-malformed.txt".to_string(),
	}
}

#[derive(Debug, Clone)]
pub struct DebugDumper {
	dir: PathBuf,
}

impl DebugDumper {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	async fn write(&self, payload: &UnhandledPayload) -> anyhow::Result<PathBuf> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.with_context(|| format!("create {}", self.dir.display()))?;
		let path = self.dir.join(dump_file_name(&payload.kind));
		tokio::fs::write(&path, payload.body.as_bytes())
			.await
			.with_context(|| format!("write {}", path.display()))?;
		Ok(path)
	}

	/// Write the payload, overwriting the previous one of the same kind. Never fails.
	pub async fn dump(&self, payload: &UnhandledPayload) -> Option<PathBuf> {
		metrics::counter!("ravenbot_debug_payloads_total").increment(1);
		match self.write(payload).await {
			Ok(path) => {
				info!(kind = ?payload.kind, path = %path.display(), "unhandled payload saved");
				Some(path)
			}
			Err(e) => {
				warn!(kind = ?payload.kind, error = %e, "failed to save unhandled payload");
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_names_follow_discriminator() {
		assert_eq!(
			dump_file_name(&UnhandledKind::ControlType("AUTH_REVOKED".to_string())),
			"payload-type-AUTH_REVOKED.json"
		);
		assert_eq!(
			dump_file_name(&UnhandledKind::MessageType("viewcount".to_string())),
			"payload-message-viewcount.json"
		);
		assert_eq!(
			dump_file_name(&UnhandledKind::MessageType("../../etc/passwd".to_string())),
			"payload-message-______etc_passwd.json"
		);
		assert_eq!(
			dump_file_name(&UnhandledKind::ControlType(String::new())),
			"payload-type-undefined.json"
		);
		assert_eq!(dump_file_name(&UnhandledKind::Unknown), "payload-unknown.json");
		assert_eq!(dump_file_name(&UnhandledKind::Malformed), "payload-malformed.txt");
	}

	#[tokio::test]
	async fn dump_creates_directory_and_overwrites() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let dumper = DebugDumper::new(tmp.path().join("logs"));
		let payload = |body: &str| UnhandledPayload {
			kind: UnhandledKind::MessageType("viewcount".to_string()),
			body: body.to_string(),
		};

		let path = dumper.dump(&payload("first")).await.expect("written");
		dumper.dump(&payload("second")).await.expect("written");
		assert_eq!(std::fs::read_to_string(path).expect("read"), "second");
	}

	#[tokio::test]
	async fn write_failures_are_swallowed() {
		let tmp = tempfile::tempdir().expect("tempdir");
		let blocker = tmp.path().join("not-a-dir");
		std::fs::write(&blocker, b"x").expect("write");
		let dumper = DebugDumper::new(&blocker);
		let payload = UnhandledPayload {
			kind: UnhandledKind::Unknown,
			body: "{}".to_string(),
		};
		assert!(dumper.dump(&payload).await.is_none());
	}
}
