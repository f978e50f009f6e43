use chrono::{Local, TimeZone};
use textwrap::wrap;

use persona_chat::{ChatEvent, Contact, DeliveryStatus, MediaKind, Message, Presence, Sender};

// Plain-text rendering of conversation events for the terminal client

const WRAP_WIDTH: usize = 72;

pub fn format_time(timestamp_millis: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_millis).single() {
        Some(time) => time.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

fn status_ticks(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Sent => "✓",
        DeliveryStatus::Delivered => "✓✓",
        DeliveryStatus::Read => "✓✓ (read)",
    }
}

pub fn render_message(message: &Message, contact_name: &str) -> String {
    let speaker = match message.sender {
        Sender::Me => "you",
        Sender::Them => contact_name,
    };

    let mut body = String::new();
    if let Some(media) = &message.media {
        let label = match media.kind {
            MediaKind::Image => "[photo]",
            MediaKind::Audio => "[voice message]",
        };
        body.push_str(label);
    }
    if let Some(text) = &message.text {
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(text);
    }

    let prefix = format!("[{}] {}: ", format_time(message.timestamp), speaker);
    let indent = " ".repeat(prefix.chars().count());
    let lines = wrap(&body, WRAP_WIDTH);

    let mut rendered = String::new();
    for (i, line) in lines.iter().enumerate() {
        rendered.push_str(if i == 0 { &prefix } else { &indent });
        rendered.push_str(line);
        rendered.push('\n');
    }
    if message.sender == Sender::Me {
        rendered.push_str(&indent);
        rendered.push_str(status_ticks(message.delivery_status));
        rendered.push('\n');
    }
    rendered.trim_end().to_string()
}

pub fn render_presence(presence: &Presence) -> String {
    match presence {
        Presence::Online => "online".to_string(),
        Presence::LastSeen(at) => format!("last seen today at {}", format_time(*at)),
    }
}

/// One line of output for an event, or None for events not worth printing
pub fn render_event(event: &ChatEvent, contact: &Contact) -> Option<String> {
    match event {
        ChatEvent::MessageAppended { contact_id, message } if *contact_id == contact.id => {
            // Outgoing messages were echoed by the terminal already
            if message.sender == Sender::Them {
                Some(render_message(message, &contact.name))
            } else {
                None
            }
        }
        ChatEvent::TypingChanged { contact_id, typing: true } if *contact_id == contact.id => {
            Some(format!("  {} is typing...", contact.name))
        }
        ChatEvent::PresenceChanged { contact_id, presence } if *contact_id == contact.id => {
            Some(format!("  {} is {}", contact.name, render_presence(presence)))
        }
        _ => None,
    }
}
