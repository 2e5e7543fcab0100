#![forbid(unsafe_code)]

//! IRCv3 line codec for Twitch chat.
//!
//! Wire form: `[@tags SPACE] [:prefix SPACE] command [params] [:trailing]`.
//! Parsing operates on a single line without the trailing `\r\n`.

use std::collections::BTreeMap;
use std::fmt;

use raven_domain::Badges;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrcParseError {
	#[error("empty line")]
	Empty,
	#[error("missing command")]
	MissingCommand,
}

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcMessage {
	/// IRCv3 tags, values unescaped.
	pub tags: BTreeMap<String, String>,
	/// `nick!user@host` or a server name.
	pub prefix: Option<String>,
	pub command: String,
	/// The last entry holds the trailing parameter, if any.
	pub params: Vec<String>,
}

impl IrcMessage {
	pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
		Self {
			command: command.into(),
			params,
			..Self::default()
		}
	}

	pub fn parse(line: &str) -> Result<Self, IrcParseError> {
		let mut rest = line.trim_end_matches(['\r', '\n']);
		if rest.trim().is_empty() {
			return Err(IrcParseError::Empty);
		}

		let mut tags = BTreeMap::new();
		if let Some(tagged) = rest.strip_prefix('@') {
			let (raw_tags, after) = tagged.split_once(' ').ok_or(IrcParseError::MissingCommand)?;
			for pair in raw_tags.split(';').filter(|p| !p.is_empty()) {
				let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
				tags.insert(k.to_string(), unescape_tag_value(v));
			}
			rest = after.trim_start_matches(' ');
		}

		let mut prefix = None;
		if let Some(prefixed) = rest.strip_prefix(':') {
			let (p, after) = prefixed.split_once(' ').ok_or(IrcParseError::MissingCommand)?;
			prefix = Some(p.to_string());
			rest = after.trim_start_matches(' ');
		}

		let (command, mut remaining) = match rest.split_once(' ') {
			Some((c, r)) => (c, r),
			None => (rest, ""),
		};
		if command.is_empty() {
			return Err(IrcParseError::MissingCommand);
		}

		let mut params = Vec::new();
		while !remaining.is_empty() {
			if let Some(trailing) = remaining.strip_prefix(':') {
				params.push(trailing.to_string());
				break;
			}
			match remaining.split_once(' ') {
				Some((p, r)) => {
					if !p.is_empty() {
						params.push(p.to_string());
					}
					remaining = r;
				}
				None => {
					params.push(remaining.to_string());
					break;
				}
			}
		}

		Ok(Self {
			tags,
			prefix,
			command: command.to_ascii_uppercase(),
			params,
		})
	}

	pub fn tag(&self, key: &str) -> Option<&str> {
		self.tags.get(key).map(String::as_str)
	}

	/// Nick part of a `nick!user@host` prefix.
	pub fn nick(&self) -> Option<&str> {
		let prefix = self.prefix.as_deref()?;
		let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
		(!nick.is_empty()).then_some(nick)
	}

	pub fn param(&self, idx: usize) -> Option<&str> {
		self.params.get(idx).map(String::as_str)
	}

	/// Serialize to the wire format (without trailing `\r\n`). Tags are not emitted.
	pub fn to_wire(&self) -> String {
		let mut out = String::new();
		if let Some(prefix) = &self.prefix {
			out.push(':');
			out.push_str(prefix);
			out.push(' ');
		}
		out.push_str(&self.command);
		if let Some((last, head)) = self.params.split_last() {
			for p in head {
				out.push(' ');
				out.push_str(p);
			}
			out.push_str(" :");
			out.push_str(last);
		}
		out
	}
}

impl fmt::Display for IrcMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_wire())
	}
}

fn unescape_tag_value(v: &str) -> String {
	let mut out = String::with_capacity(v.len());
	let mut chars = v.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some(':') => out.push(';'),
			Some('s') => out.push(' '),
			Some('r') => out.push('\r'),
			Some('n') => out.push('\n'),
			Some(other) => out.push(other),
			None => {}
		}
	}
	out
}

/// Badge flags from a Twitch `badges` tag (`broadcaster/1,moderator/1,...`)
/// combined with the legacy `mod` tag.
pub fn badges_from_tags(msg: &IrcMessage) -> Badges {
	let mut badges = Badges::default();
	if let Some(raw) = msg.tag("badges") {
		for badge in raw.split(',') {
			match badge.split('/').next().unwrap_or_default() {
				"broadcaster" => badges.broadcaster = true,
				"moderator" => badges.moderator = true,
				_ => {}
			}
		}
	}
	if msg.tag("mod") == Some("1") {
		badges.moderator = true;
	}
	badges
}

pub(crate) fn privmsg(channel_irc: &str, text: &str) -> String {
	// CR/LF would terminate the line early and let the rest be read as a new command.
	let text: String = text.chars().map(|c| if c == '\r' || c == '\n' { ' ' } else { c }).collect();
	IrcMessage::new("PRIVMSG", vec![channel_irc.to_string(), text]).to_wire()
}
