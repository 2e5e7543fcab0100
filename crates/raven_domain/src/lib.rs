#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("command name must start with '!': {0}")]
	MissingBang(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Chat channel (broadcaster login), always lower-case and without the IRC `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelName(String);

impl ChannelName {
	/// Normalize and validate a channel name (`#Raven` and `raven` are the same channel).
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		let trimmed = name.trim().trim_start_matches('#');
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if trimmed.chars().any(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(name));
		}
		Ok(Self(trimmed.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// IRC form, e.g. `#raven`.
	pub fn irc(&self) -> String {
		format!("#{}", self.0)
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::new(s.to_string())
	}
}

/// Chat command identifier, e.g. `!discord`.
///
/// Identifiers are case-sensitive and compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CommandName(String);

impl CommandName {
	pub const PREFIX: char = '!';

	/// Create a command name; it must be a single token starting with `!`.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		if name.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if !name.starts_with(Self::PREFIX) || name.len() == Self::PREFIX.len_utf8() {
			return Err(ParseIdError::MissingBang(name));
		}
		if name.chars().any(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(name));
		}
		Ok(Self(name))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for CommandName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for CommandName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		CommandName::new(s.to_string())
	}
}

/// Badge flags the platform attaches to a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Badges {
	pub broadcaster: bool,
	pub moderator: bool,
}

/// Issuer privilege, recomputed for every message.
///
/// Ordered: `Everyone < Moderator < Broadcaster`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Role {
	Everyone,
	Moderator,
	Broadcaster,
}

impl Role {
	pub fn from_badges(badges: Badges) -> Self {
		if badges.broadcaster {
			Role::Broadcaster
		} else if badges.moderator {
			Role::Moderator
		} else {
			Role::Everyone
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Role::Everyone => "everyone",
			Role::Moderator => "moderator",
			Role::Broadcaster => "broadcaster",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Command tier (who may invoke a command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Tier {
	Public,
	Moderator,
	Broadcaster,
	/// User-defined reply, lowest precedence.
	Custom,
}

impl Tier {
	/// Minimum role needed to invoke a command of this tier.
	pub const fn required_role(self) -> Role {
		match self {
			Tier::Public | Tier::Custom => Role::Everyone,
			Tier::Moderator => Role::Moderator,
			Tier::Broadcaster => Role::Broadcaster,
		}
	}

	/// Stable label (metrics, logs).
	pub const fn as_str(self) -> &'static str {
		match self {
			Tier::Public => "public",
			Tier::Moderator => "moderator",
			Tier::Broadcaster => "broadcaster",
			Tier::Custom => "custom",
		}
	}

	pub fn allows(self, role: Role) -> bool {
		role >= self.required_role()
	}
}

impl fmt::Display for Tier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn channel_name_is_normalized() {
		let c = ChannelName::new("#RavenDwyr").unwrap();
		assert_eq!(c.as_str(), "ravendwyr");
		assert_eq!(c.irc(), "#ravendwyr");
		assert!(ChannelName::new("  ").is_err());
		assert!(ChannelName::new("two words").is_err());
	}

	#[test]
	fn command_name_requires_bang() {
		assert_eq!(CommandName::new("!greet").unwrap().as_str(), "!greet");
		assert_eq!(
			CommandName::new("greet").unwrap_err(),
			ParseIdError::MissingBang("greet".to_string())
		);
		assert!(matches!(CommandName::new("!"), Err(ParseIdError::MissingBang(_))));
		assert_eq!(CommandName::new("").unwrap_err(), ParseIdError::Empty);
	}

	#[test]
	fn command_names_keep_their_case() {
		let mixed = CommandName::new("!Greet").unwrap();
		assert_eq!(mixed.as_str(), "!Greet");
		assert_ne!(mixed, CommandName::new("!greet").unwrap());
	}

	#[test]
	fn role_is_ordered_and_derived_from_badges() {
		assert!(Role::Broadcaster > Role::Moderator);
		assert!(Role::Moderator > Role::Everyone);

		let both = Badges {
			broadcaster: true,
			moderator: true,
		};
		assert_eq!(Role::from_badges(both), Role::Broadcaster);
		assert_eq!(
			Role::from_badges(Badges {
				broadcaster: false,
				moderator: true
			}),
			Role::Moderator
		);
		assert_eq!(Role::from_badges(Badges::default()), Role::Everyone);
	}

	#[test]
	fn tier_gating() {
		assert!(Tier::Public.allows(Role::Everyone));
		assert!(Tier::Custom.allows(Role::Everyone));
		assert!(!Tier::Moderator.allows(Role::Everyone));
		assert!(Tier::Moderator.allows(Role::Broadcaster));
		assert!(!Tier::Broadcaster.allows(Role::Moderator));
	}

	proptest! {
		#[test]
		fn bang_prefixed_tokens_are_valid_names(rest in "[a-zA-Z0-9_]{1,24}") {
			let name = format!("!{rest}");
			let parsed = CommandName::new(name.clone()).unwrap();
			prop_assert_eq!(parsed.as_str(), name.as_str());
		}

		#[test]
		fn names_without_bang_are_rejected(name in "[a-zA-Z0-9_][a-zA-Z0-9_!]{0,24}") {
			prop_assert!(CommandName::new(name).is_err());
		}
	}
}
