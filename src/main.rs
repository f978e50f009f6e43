use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod config;
mod console;
mod utils;

use persona_chat::media::{self, AudioCapture};
use persona_chat::reply::GeminiClient;
use persona_chat::store::{FileKeyValueStore, KeyValueStore};
use persona_chat::{ChatEvent, ChatSession, Contact, ConversationStore};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A terminal chat with a scripted persona backed by a hosted language model.",
    long_about = "Chat with a scripted persona. Messages sent in quick succession are answered together.\n\n\
    Commands inside the chat:\n\
    /image <path> [caption]   Send a picture\n\
    /audio <path>             Send an audio file as a voice message\n\
    /record <path>            Start recording audio from a file or fifo\n\
    /stop                     Stop recording and send it\n\
    /cancel                   Stop recording and discard it\n\
    /history                  Show the whole conversation\n\
    /quit                     Leave"
)]
struct Args {
    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the conversation history
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Override the user name from the config (history is kept per user)
    #[arg(long)]
    user: Option<String>,

    /// Contact to chat with, defaults to the first configured contact
    #[arg(long)]
    contact: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Store an API key in the config file and exit
    #[arg(long, value_name = "KEY")]
    save_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::setup_logging(args.log_file.as_deref(), LevelFilter::Info)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    if let Some(path) = &args.config {
        config::set_config_path_override(path.clone());
    }
    let mut app_config = config::load_config()?;

    if let Some(api_key) = &args.save_api_key {
        app_config.set_api_key(api_key);
        config::save_config(&app_config)?;
        println!("API key saved.");
        return Ok(());
    }

    if let Some(user) = &args.user {
        app_config.user_name = user.clone();
    }

    let gemini_config = app_config.gemini_config();
    if gemini_config.api_key.is_none() {
        warn!("No API key configured, every reply will be the fallback message");
        eprintln!("Warning: no API key set (GEMINI_API_KEY or --save-api-key). Replies will fail.");
    }
    let generator = Arc::new(GeminiClient::new(gemini_config)?);

    let storage: Box<dyn KeyValueStore> = match &args.data_dir {
        Some(dir) => Box::new(FileKeyValueStore::new(dir.clone())?),
        None => Box::new(FileKeyValueStore::new_default()?),
    };
    let mut store = ConversationStore::new(storage, &app_config.user_name, app_config.contacts());
    let loaded = store.load();

    let contact = match &args.contact {
        Some(id) => store
            .contact(id)
            .cloned()
            .ok_or_else(|| anyhow!("No contact with id {} in the config", id))?,
        None => store
            .contacts()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("No contacts configured"))?,
    };

    let (event_tx, event_rx) = mpsc::channel(100);
    let session = ChatSession::new(store, generator, app_config.session_config(), Some(event_tx));
    session.open(&contact.id).await?;

    println!("Chatting with {} ({} messages in history). /quit to leave.", contact.name, loaded);
    print_history(&session, &contact, 15).await;
    println!("  {} is {}", contact.name, console::render_presence(&session.presence(&contact.id)));

    let printer = tokio::spawn(print_events(event_rx, contact.clone()));

    if let Err(e) = run_input_loop(&session, &contact).await {
        error!("Input loop failed: {}", e);
        eprintln!("Error: {}", e);
    }

    session.shutdown();
    printer.abort();
    println!("Chat session ended.");
    Ok(())
}

async fn print_history(session: &ChatSession, contact: &Contact, limit: usize) {
    let store = session.store();
    let store = store.lock().await;
    for message in store.history(&contact.id, limit) {
        println!("{}", console::render_message(&message, &contact.name));
    }
}

async fn print_events(mut event_rx: mpsc::Receiver<ChatEvent>, contact: Contact) {
    while let Some(event) = event_rx.recv().await {
        if let Some(line) = console::render_event(&event, &contact) {
            println!("{}", line);
        }
    }
}

/// Read lines from stdin until /quit or end of input
async fn run_input_loop(session: &ChatSession, contact: &Contact) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recording: Option<AudioCapture> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" => break,
            "/history" => print_history(session, contact, usize::MAX).await,
            "/image" => {
                let (path, caption) = match rest.split_once(' ') {
                    Some((path, caption)) => (path, Some(caption)),
                    None => (rest, None),
                };
                if path.is_empty() {
                    println!("Usage: /image <path> [caption]");
                    continue;
                }
                match session.send_image_file(&contact.id, caption, Path::new(path)).await {
                    Ok(_) => println!("  (photo sent)"),
                    Err(e) => {
                        warn!("Failed to send image {}: {}", path, e);
                        println!("  Could not process the image: {}", e);
                    }
                }
            }
            "/audio" => match media::load_audio(Path::new(rest)).await {
                Ok(payload) => match session.send_audio(&contact.id, payload).await {
                    Ok(_) => println!("  (voice message sent)"),
                    Err(e) => println!("  Could not send the audio: {}", e),
                },
                Err(e) => {
                    warn!("Failed to load audio {}: {}", rest, e);
                    println!("  Could not read the audio file: {}", e);
                }
            },
            "/record" => {
                if recording.is_some() {
                    println!("  Already recording, /stop or /cancel first");
                    continue;
                }
                let path = Path::new(rest);
                let mime_type = media::mime_type_for_path(path)
                    .filter(|m| m.starts_with("audio/"))
                    .unwrap_or("audio/webm");
                match tokio::fs::File::open(path).await {
                    Ok(file) => {
                        recording = Some(AudioCapture::start(file, mime_type));
                        println!("  Recording... /stop to send, /cancel to discard");
                    }
                    Err(e) => println!("  Could not open the audio source: {}", e),
                }
            }
            "/stop" => match recording.take() {
                Some(capture) => {
                    let duration = media::format_duration(capture.elapsed().as_secs());
                    match capture.stop().await {
                        Ok(payload) => match session.send_audio(&contact.id, payload).await {
                            Ok(_) => println!("  (voice message sent, {})", duration),
                            Err(e) => println!("  Could not send the recording: {}", e),
                        },
                        Err(e) => println!("  Recording failed: {}", e),
                    }
                }
                None => println!("  Not recording"),
            },
            "/cancel" => match recording.take() {
                Some(capture) => {
                    capture.cancel();
                    println!("  Recording discarded");
                }
                None => println!("  Not recording"),
            },
            _ => {
                if let Err(e) = session.send_text(&contact.id, line).await {
                    println!("  Could not send: {}", e);
                }
            }
        }
    }

    if let Some(capture) = recording.take() {
        capture.cancel();
    }
    Ok(())
}
