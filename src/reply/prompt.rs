use crate::models::{MediaKind, Message, Sender};

use super::ReplyRequest;

/// Render history as one `speaker: content` line per message
pub fn render_history(history: &[Message], user_name: &str, contact_name: &str) -> String {
    history
        .iter()
        .map(|message| {
            let speaker = match message.sender {
                Sender::Me => user_name,
                Sender::Them => contact_name,
            };
            let text = message.text.as_deref().unwrap_or("");
            match message.media.as_ref().map(|m| m.kind) {
                Some(MediaKind::Image) => format!("{}: [sent an image] {}", speaker, text).trim_end().to_string(),
                Some(MediaKind::Audio) => format!("{}: [sent an audio]", speaker),
                None => format!("{}: {}", speaker, text),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full text prompt for one reply
pub fn build_prompt(request: &ReplyRequest) -> String {
    let history = render_history(&request.history, &request.user_name, &request.contact_name);

    let mut prompt = format!(
        "You are {name}.\n\
         \n\
         Critical instructions:\n\
         1. COMPLETE SENTENCES: never stop a message halfway.\n\
         2. NATURAL TONE: write like a real chat, casual and lowercase.\n\
         3. LENGTH: short, direct messages.\n\
         4. NO REPETITION: check the recent history below and do not repeat what you already sent.\n\
         5. {persona}\n\
         \n\
         Conversation history:\n\
         {history}\n\
         \n\
         Current message from the user ({user}): {text}",
        name = request.contact_name,
        persona = request.persona,
        history = history,
        user = request.user_name,
        text = request.text,
    );

    match request.media.as_ref().map(|m| m.kind) {
        Some(MediaKind::Audio) => {
            prompt.push_str("\n\n[The user sent an audio message. Reply to its content while staying in character.]")
        }
        Some(MediaKind::Image) => prompt.push_str("\n\n[The user sent an image.]"),
        None => {}
    }

    prompt
}
