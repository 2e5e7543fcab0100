#![forbid(unsafe_code)]

mod client;
pub mod frames;
pub mod heartbeat;


pub use client::{PubSubClient, PubSubConfig, PubSubEvent, ReconnectTrigger};
pub use frames::{UnhandledKind, UnhandledPayload};
pub use heartbeat::{HeartbeatTiming, ReconnectPolicy};
