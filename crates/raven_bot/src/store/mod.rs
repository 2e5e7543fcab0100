#![forbid(unsafe_code)]

//! Custom command persistence: `!name` -> reply text.

mod sqlite;

use std::collections::BTreeMap;

use tokio::sync::Mutex;

pub use sqlite::SqliteCommandStore;

#[async_trait::async_trait]
pub trait CommandStore: Send + Sync + 'static {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

	async fn get_or(&self, key: &str, default: &str) -> anyhow::Result<String> {
		Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
	}

	/// Insert or overwrite.
	async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

	/// Returns whether the key existed.
	async fn delete(&self, key: &str) -> anyhow::Result<bool>;

	async fn list_all(&self) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct InMemoryCommandStore {
	inner: Mutex<BTreeMap<String, String>>,
}

impl InMemoryCommandStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl CommandStore for InMemoryCommandStore {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
		Ok(self.inner.lock().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
		self.inner.lock().await.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<bool> {
		Ok(self.inner.lock().await.remove(key).is_some())
	}

	async fn list_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
		Ok(self.inner.lock().await.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn in_memory_basic_ops() {
		let store = InMemoryCommandStore::new();
		assert_eq!(store.get("!greet").await.unwrap(), None);
		assert_eq!(store.get_or("!greet", "nope").await.unwrap(), "nope");

		store.set("!greet", "hello there").await.unwrap();
		store.set("!bye", "see ya").await.unwrap();
		assert_eq!(store.get("!greet").await.unwrap().as_deref(), Some("hello there"));

		store.set("!greet", "hi").await.unwrap();
		let all = store.list_all().await.unwrap();
		assert_eq!(all.len(), 2);
		assert_eq!(all["!greet"], "hi");
		assert_eq!(all["!bye"], "see ya");

		assert!(store.delete("!greet").await.unwrap());
		assert!(!store.delete("!greet").await.unwrap());
		assert_eq!(store.list_all().await.unwrap().keys().collect::<Vec<_>>(), vec!["!bye"]);
	}
}
