#![forbid(unsafe_code)]

use std::time::Duration;

use raven_platform::twitch::{PubSubEvent, ReconnectTrigger};

fn retry_phrase(delay: Duration) -> String {
	let secs = delay.as_secs();
	if secs == 1 {
		"1 second".to_string()
	} else {
		format!("{secs} seconds")
	}
}

/// Chat line announcing a pubsub state change, if it deserves one.
pub fn announcement(event: &PubSubEvent) -> Option<String> {
	match event {
		PubSubEvent::StreamUp => Some("The stream is now live! PopCorn".to_string()),
		PubSubEvent::StreamDown => Some("The stream has ended. See you all again soon! KonCha".to_string()),
		PubSubEvent::Reconnecting { trigger, delay, .. } => match trigger {
			ReconnectTrigger::PongTimeout => Some(format!(
				"PONG message not received from Twitch's websocket. Attempting to recreate the connection in {}...",
				retry_phrase(*delay)
			)),
			ReconnectTrigger::ServerRequested => Some(format!(
				"RECONNECT message received from Twitch's websocket. Attempting to recreate the connection in {}...",
				retry_phrase(*delay)
			)),
			ReconnectTrigger::ConnectionLost(_) => None,
		},
		PubSubEvent::Connected { .. }
		| PubSubEvent::Subscribed { .. }
		| PubSubEvent::ConnectFailed { .. }
		| PubSubEvent::Unhandled(_) => None,
	}
}
