// Send path and persistence tests

mod common;
use common::{png_bytes, setup_logging, test_config, test_session, test_store, RecordingGenerator, SETTLE};

use anyhow::Result;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::time::sleep;

use persona_chat::media::{self, MediaError};
use persona_chat::store::{storage_key, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use persona_chat::{ChatSession, DeliveryStatus, MediaKind, Presence, Sender, SessionError};

#[tokio::test(start_paused = true)]
async fn test_image_with_caption() -> Result<()> {
    let generator = RecordingGenerator::replying("que linda!");
    let (session, _events) = test_session(&generator);

    let sent = session
        .send_image("1", Some("olha essa foto"), png_bytes(2000, 1000), "image/png")
        .await?;
    assert_eq!(sent.sender, Sender::Me);
    assert_eq!(sent.text.as_deref(), Some("olha essa foto"));
    let payload = sent.media.clone().unwrap();
    assert_eq!(payload.kind, MediaKind::Image);
    assert!(payload.data_url.starts_with("data:image/png;base64,"));

    let decoded = image::load_from_memory(&media::decode_data_url(&payload.data_url)?)?;
    assert_eq!((decoded.width(), decoded.height()), (800, 400));

    sleep(SETTLE).await;
    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "olha essa foto");
    assert_eq!(requests[0].media.as_ref().map(|m| m.kind), Some(MediaKind::Image));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_image_without_caption_uses_marker() -> Result<()> {
    let generator = RecordingGenerator::replying("hm?");
    let (session, _events) = test_session(&generator);

    let sent = session.send_image("1", None, png_bytes(300, 200), "image/png").await?;
    assert_eq!(sent.text, None);
    assert_eq!(sent.preview(), "📷 Photo");

    sleep(SETTLE).await;
    assert_eq!(generator.texts(), vec!["[sent media: image]".to_string()]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_text_and_image_burst_keeps_media() -> Result<()> {
    let generator = RecordingGenerator::replying("kkkk");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "olha").await?;
    session.send_image("1", None, png_bytes(10, 10), "image/png").await?;
    session.send_text("1", "que tal?").await?;
    sleep(SETTLE).await;

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "olha | [sent media: image] | que tal?");
    assert!(requests[0].media.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_image_sends_nothing() {
    let generator = RecordingGenerator::replying("nunca");
    let (session, _events) = test_session(&generator);

    let result = session
        .send_image("1", Some("legenda"), b"not an image".to_vec(), "image/png")
        .await;
    assert!(matches!(result, Err(SessionError::Media(_))));

    let empty = session.send_image("1", None, Vec::new(), "image/png").await;
    assert!(matches!(empty, Err(SessionError::Media(MediaError::Empty))));

    assert_eq!(session.accumulator().pending_fragments("1"), 0);
    sleep(SETTLE).await;
    assert!(generator.requests().is_empty());
    assert!(session.store().lock().await.messages("1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_audio_message() -> Result<()> {
    let generator = RecordingGenerator::replying("ouvi aqui");
    let (session, _events) = test_session(&generator);

    let payload = media::encode_audio(b"OggS fake audio", "audio/ogg")?;
    let sent = session.send_audio("1", payload).await?;
    assert_eq!(sent.preview(), "🎤 Audio");

    sleep(SETTLE).await;
    let requests = generator.requests();
    assert_eq!(requests[0].text, "[sent media: audio]");
    assert_eq!(requests[0].media.as_ref().unwrap().mime_type, "audio/ogg");

    // An image payload is not a voice message
    let image = media::encode_image(&png_bytes(4, 4), "image/png", 800)?;
    assert!(session.send_audio("1", image).await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_sends() {
    let generator = RecordingGenerator::replying("oi");
    let (session, _events) = test_session(&generator);

    assert!(matches!(
        session.send_text("99", "oi").await,
        Err(SessionError::UnknownContact(_))
    ));
    assert!(matches!(
        session.send_text("1", "   ").await,
        Err(SessionError::EmptyMessage(_))
    ));
    assert!(session.open("99").await.is_err());

    sleep(SETTLE).await;
    assert!(generator.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unread_and_presence() -> Result<()> {
    let generator = RecordingGenerator::replying("tô aqui");
    let (session, _events) = test_session(&generator);

    assert!(matches!(session.presence("1"), Presence::LastSeen(_)));

    session.send_text("1", "oi").await?;
    // Online shortly after activity, well before the reply arrives
    sleep(std::time::Duration::from_millis(2600)).await;
    assert_eq!(session.presence("1"), Presence::Online);

    sleep(SETTLE).await;
    {
        let store = session.store();
        let store = store.lock().await;
        let contact = store.contact("1").unwrap();
        assert_eq!(contact.unread_count, 1);
        assert_eq!(contact.last_message, "tô aqui");
    }
    assert!(matches!(session.presence("1"), Presence::LastSeen(_)));

    session.open("1").await?;
    assert_eq!(session.store().lock().await.contact("1").unwrap().unread_count, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_history_survives_restart() -> Result<()> {
    setup_logging();
    let dir = tempdir()?;
    let generator = RecordingGenerator::replying("até amanhã");

    {
        let store = test_store(FileKeyValueStore::new(dir.path().to_path_buf())?);
        let session = ChatSession::new(store, Arc::new(generator.clone()), test_config(), None);
        session.send_text("1", "boa noite").await?;
        session
            .send_image("1", Some("minha janta"), png_bytes(40, 20), "image/png")
            .await?;
        sleep(SETTLE).await;
        session.shutdown();
    }

    let storage = FileKeyValueStore::new(dir.path().to_path_buf())?;
    assert!(storage.get(&storage_key("Ana"))?.is_some());

    let reopened = test_store(storage);
    let messages = reopened.messages("1");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].text.as_deref(), Some("boa noite"));
    assert_eq!(messages[0].delivery_status, DeliveryStatus::Read);
    assert_eq!(messages[1].media.as_ref().unwrap().mime_type, "image/png");
    assert_eq!(messages[2].sender, Sender::Them);
    assert_eq!(reopened.contact("1").unwrap().last_message, "até amanhã");
    assert!(reopened.messages("2").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_corrupt_history_starts_empty() {
    setup_logging();
    let storage = MemoryKeyValueStore::with_entry(&storage_key("Ana"), "{ not json");
    let store = test_store(storage);
    assert!(store.messages("1").is_empty());
    assert_eq!(store.contacts().len(), 2);
}
