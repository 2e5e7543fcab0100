#![forbid(unsafe_code)]

mod chat;
pub mod irc;
pub mod pubsub;

pub use chat::{ChatHandle, TwitchChatClient, TwitchChatConfig};
pub use pubsub::{
	HeartbeatTiming, PubSubClient, PubSubConfig, PubSubEvent, ReconnectPolicy, ReconnectTrigger, UnhandledKind,
	UnhandledPayload,
};
