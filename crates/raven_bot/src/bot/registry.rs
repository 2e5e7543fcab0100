#![forbid(unsafe_code)]

use std::collections::HashMap;

use raven_domain::{CommandName, ParseIdError, Role, Tier};

/// Handler selector for a built-in command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
	Commands,
	Discord,
	Socials,
	Shoutout,
	AddCom,
	EditCom,
	DelCom,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinCommand {
	pub name: CommandName,
	pub tier: Tier,
	pub kind: BuiltinKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	#[error("command {0} is already registered")]
	Duplicate(String),
	#[error("command {0}: custom commands live in the store, not the registry")]
	CustomTier(String),
	#[error(transparent)]
	InvalidName(#[from] ParseIdError),
}

/// Built-in commands keyed by identifier. Identifiers are unique across tiers.
#[derive(Debug, Default)]
pub struct CommandRegistry {
	entries: Vec<BuiltinCommand>,
	by_name: HashMap<String, usize>,
}

impl CommandRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_builtins() -> Result<Self, RegistryError> {
		let mut reg = Self::new();
		reg.register("!commands", Tier::Public, BuiltinKind::Commands)?;
		reg.register("!discord", Tier::Public, BuiltinKind::Discord)?;
		reg.register("!socials", Tier::Public, BuiltinKind::Socials)?;
		reg.register("!so", Tier::Moderator, BuiltinKind::Shoutout)?;
		reg.register("!addcom", Tier::Moderator, BuiltinKind::AddCom)?;
		reg.register("!editcom", Tier::Moderator, BuiltinKind::EditCom)?;
		reg.register("!delcom", Tier::Moderator, BuiltinKind::DelCom)?;
		reg.register("!shutdown", Tier::Broadcaster, BuiltinKind::Shutdown)?;
		Ok(reg)
	}

	pub fn register(&mut self, name: &str, tier: Tier, kind: BuiltinKind) -> Result<(), RegistryError> {
		let name = CommandName::new(name)?;
		if tier == Tier::Custom {
			return Err(RegistryError::CustomTier(name.into_string()));
		}
		if self.by_name.contains_key(name.as_str()) {
			return Err(RegistryError::Duplicate(name.into_string()));
		}
		self.by_name.insert(name.as_str().to_string(), self.entries.len());
		self.entries.push(BuiltinCommand { name, tier, kind });
		Ok(())
	}

	pub fn get(&self, name: &str) -> Option<&BuiltinCommand> {
		self.by_name.get(name).map(|&i| &self.entries[i])
	}

	pub fn is_builtin(&self, name: &str) -> bool {
		self.by_name.contains_key(name)
	}

	/// The built-in `role` may invoke under `name`, if any.
	pub fn resolve(&self, name: &str, role: Role) -> Option<&BuiltinCommand> {
		self.get(name).filter(|c| c.tier.allows(role))
	}

	/// Public identifiers in registration order.
	pub fn public_names(&self) -> impl Iterator<Item = &str> {
		self.entries
			.iter()
			.filter(|c| c.tier == Tier::Public)
			.map(|c| c.name.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicates_are_rejected_across_tiers() {
		let mut reg = CommandRegistry::with_builtins().expect("builtins");
		assert_eq!(
			reg.register("!so", Tier::Public, BuiltinKind::Discord),
			Err(RegistryError::Duplicate("!so".to_string()))
		);
		assert!(matches!(
			reg.register("nobang", Tier::Public, BuiltinKind::Discord),
			Err(RegistryError::InvalidName(_))
		));
		assert!(matches!(
			reg.register("!mine", Tier::Custom, BuiltinKind::Discord),
			Err(RegistryError::CustomTier(_))
		));
	}

	#[test]
	fn resolve_filters_by_role() {
		let reg = CommandRegistry::with_builtins().expect("builtins");

		assert!(reg.resolve("!shutdown", Role::Moderator).is_none());
		assert_eq!(
			reg.resolve("!shutdown", Role::Broadcaster).map(|c| c.kind),
			Some(BuiltinKind::Shutdown)
		);
		assert!(reg.resolve("!addcom", Role::Everyone).is_none());
		assert_eq!(reg.resolve("!addcom", Role::Broadcaster).map(|c| c.kind), Some(BuiltinKind::AddCom));
		assert_eq!(reg.resolve("!discord", Role::Everyone).map(|c| c.kind), Some(BuiltinKind::Discord));
		assert!(reg.resolve("!greet", Role::Broadcaster).is_none());
	}

	#[test]
	fn public_names_in_order() {
		let reg = CommandRegistry::with_builtins().expect("builtins");
		assert_eq!(reg.public_names().collect::<Vec<_>>(), vec!["!commands", "!discord", "!socials"]);
	}
}
