#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::CommandStore;

/// SQLite-backed store (`sqlite:` URLs).
#[derive(Clone)]
pub struct SqliteCommandStore {
	pool: sqlx::SqlitePool,
}

impl SqliteCommandStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow!("unsupported database_url (use sqlite:)"));
		}

		let opts = SqliteConnectOptions::from_str(database_url)
			.context("parse sqlite url")?
			.create_if_missing(true);
		// One connection keeps `sqlite::memory:` a single database.
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts)
			.await
			.context("connect sqlite")?;
		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;

		Ok(Self { pool })
	}

	#[cfg(test)]
	pub async fn close(&self) {
		self.pool.close().await;
	}
}

#[async_trait::async_trait]
impl CommandStore for SqliteCommandStore {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
		let row: Option<(String,)> = sqlx::query_as("SELECT reply FROM custom_commands WHERE name = ?")
			.bind(key)
			.fetch_optional(&self.pool)
			.await
			.context("select custom command (sqlite)")?;
		Ok(row.map(|(reply,)| reply))
	}

	async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
		sqlx::query(
			"INSERT INTO custom_commands (name, reply, updated_at) VALUES (?, ?, strftime('%s','now')) \
			ON CONFLICT(name) DO UPDATE SET reply = excluded.reply, updated_at = excluded.updated_at",
		)
		.bind(key)
		.bind(value)
		.execute(&self.pool)
		.await
		.context("upsert custom command (sqlite)")?;
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<bool> {
		let res = sqlx::query("DELETE FROM custom_commands WHERE name = ?")
			.bind(key)
			.execute(&self.pool)
			.await
			.context("delete custom command (sqlite)")?;
		Ok(res.rows_affected() > 0)
	}

	async fn list_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
		let rows: Vec<(String, String)> = sqlx::query_as("SELECT name, reply FROM custom_commands ORDER BY name")
			.fetch_all(&self.pool)
			.await
			.context("list custom commands (sqlite)")?;
		Ok(rows.into_iter().collect())
	}
}
