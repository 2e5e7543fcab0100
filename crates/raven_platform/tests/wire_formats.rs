#![forbid(unsafe_code)]

use raven_domain::{ChannelName, Role, Tier};
use raven_platform::twitch::irc::{IrcMessage, badges_from_tags};
use raven_platform::twitch::pubsub::frames::{Inbound, OutboundFrame, classify, listen_token, video_playback_topic};
use raven_platform::twitch::{UnhandledKind, UnhandledPayload};

#[test]
fn moderator_line_grants_moderator_tier() {
	let line = "@badges=moderator/1;display-name=Helper;mod=1 \
		:helper!helper@helper.tmi.twitch.tv PRIVMSG #ravendwyr :!addcom !hi hello";
	let msg = IrcMessage::parse(line).expect("parse");
	let role = Role::from_badges(badges_from_tags(&msg));

	assert_eq!(role, Role::Moderator);
	assert!(Tier::Moderator.allows(role));
	assert!(!Tier::Broadcaster.allows(role));
}

#[test]
fn plain_viewer_only_reaches_public_tiers() {
	let line = "@badges=subscriber/12;mod=0 :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #ravendwyr :!discord";
	let msg = IrcMessage::parse(line).expect("parse");
	let role = Role::from_badges(badges_from_tags(&msg));

	assert_eq!(role, Role::Everyone);
	assert!(Tier::Public.allows(role));
	assert!(Tier::Custom.allows(role));
	assert!(!Tier::Moderator.allows(role));
}

#[test]
fn listen_then_stream_status_envelopes() {
	let channel = ChannelName::new("ravendwyr").expect("channel");
	let listen = OutboundFrame::listen(listen_token("oauth:tok"), vec![video_playback_topic(&channel)]).to_json();
	assert!(listen.contains("\"auth_token\":\"tok\""));
	assert!(listen.contains("video-playback.ravendwyr"));

	let up = r#"{"type":"MESSAGE","data":{"topic":"video-playback.ravendwyr","message":"{\"type\":\"stream-up\",\"server_time\":1}"}}"#;
	let down = r#"{"type":"MESSAGE","data":{"topic":"video-playback.ravendwyr","message":"{\"type\":\"stream-down\"}"}}"#;
	assert_eq!(classify(up), Inbound::StreamUp);
	assert_eq!(classify(down), Inbound::StreamDown);
}

#[test]
fn viewer_count_updates_are_left_for_debug_dumps() {
	let raw = r#"{"type":"MESSAGE","data":{"message":"{\"type\":\"viewcount\",\"viewers\":12}"}}"#;
	match classify(raw) {
		Inbound::Unhandled(UnhandledPayload { kind, body }) => {
			assert_eq!(kind, UnhandledKind::MessageType("viewcount".to_string()));
			assert!(body.starts_with("{\n    "));
		}
		other => panic!("expected unhandled, got {other:?}"),
	}
}
