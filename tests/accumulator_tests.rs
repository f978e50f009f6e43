// Debounce and reply pipeline tests
// Time is paused, so the debounce and think-time sleeps advance instantly.

mod common;
use common::{collect_events, setup_logging, test_session, RecordingGenerator, SETTLE};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::sleep;

use persona_chat::store::MemoryKeyValueStore;
use persona_chat::{
    AccumulatorConfig, ChatEvent, DeliveryStatus, Fragment, Message, MessageAccumulator, Sender,
};

#[tokio::test(start_paused = true)]
async fn test_burst_is_answered_once() {
    let generator = RecordingGenerator::replying("oii, tô sim");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "oi").await.unwrap();
    sleep(Duration::from_secs(1)).await;
    session.send_text("1", "vc ta aí?").await.unwrap();
    sleep(SETTLE).await;

    assert_eq!(generator.texts(), vec!["oi | vc ta aí?".to_string()]);

    let store = session.store();
    let store = store.lock().await;
    let messages = store.messages("1");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].sender, Sender::Them);
    assert_eq!(messages[2].text.as_deref(), Some("oii, tô sim"));
}

#[tokio::test(start_paused = true)]
async fn test_no_dispatch_before_quiet_period() {
    let generator = RecordingGenerator::replying("oi");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "a").await.unwrap();
    sleep(Duration::from_secs(3)).await;
    session.send_text("1", "b").await.unwrap();
    sleep(Duration::from_secs(3)).await;
    session.send_text("1", "c").await.unwrap();

    // The last fragment restarted the window
    sleep(Duration::from_secs(3)).await;
    assert!(generator.requests().is_empty());
    assert_eq!(session.accumulator().pending_fragments("1"), 3);

    sleep(SETTLE).await;
    assert_eq!(generator.texts(), vec!["a | b | c".to_string()]);
    assert_eq!(session.accumulator().pending_fragments("1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_spaced_sends_are_answered_separately() {
    let generator = RecordingGenerator::replying("hmm");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "primeira").await.unwrap();
    sleep(Duration::from_secs(4)).await;
    session.send_text("1", "segunda").await.unwrap();
    sleep(SETTLE).await;

    let mut texts = generator.texts();
    texts.sort();
    assert_eq!(texts, vec!["primeira".to_string(), "segunda".to_string()]);

    let store = session.store();
    let store = store.lock().await;
    let replies = store
        .messages("1")
        .iter()
        .filter(|m| m.sender == Sender::Them)
        .count();
    assert_eq!(replies, 2);
    assert!(!store.is_typing("1"));
}

#[tokio::test(start_paused = true)]
async fn test_conversations_do_not_share_buffers() {
    let generator = RecordingGenerator::replying("e aí");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "oi patricia").await.unwrap();
    sleep(Duration::from_secs(1)).await;
    session.send_text("2", "oi marcos").await.unwrap();
    sleep(SETTLE).await;

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);

    let patricia = requests.iter().find(|r| r.contact_name == "Patricia").unwrap();
    assert_eq!(patricia.text, "oi patricia");
    assert!(patricia.persona.contains("Patricia"));
    assert_eq!(patricia.user_name, "Ana");

    let marcos = requests.iter().find(|r| r.contact_name == "Marcos").unwrap();
    assert_eq!(marcos.text, "oi marcos");

    let store = session.store();
    let store = store.lock().await;
    assert_eq!(store.messages("1").len(), 2);
    assert_eq!(store.messages("2").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_generator_failure_sends_fallback() {
    let generator = RecordingGenerator::failing("quota exceeded");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "oi").await.unwrap();
    sleep(SETTLE).await;

    assert_eq!(generator.requests().len(), 1);

    let fallback = AccumulatorConfig::default().fallback_reply;
    let store = session.store();
    let store = store.lock().await;
    let last = store.messages("1").last().unwrap();
    assert_eq!(last.sender, Sender::Them);
    assert_eq!(last.text.as_deref(), Some(fallback.as_str()));
    assert!(!store.is_typing("1"));
}

#[tokio::test(start_paused = true)]
async fn test_blank_reply_sends_fallback() {
    let generator = RecordingGenerator::replying("   ");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "oi").await.unwrap();
    sleep(SETTLE).await;

    let fallback = AccumulatorConfig::default().fallback_reply;
    let store = session.store();
    let store = store.lock().await;
    assert_eq!(
        store.messages("1").last().unwrap().text.as_deref(),
        Some(fallback.as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_outgoing_statuses_progress_to_read() {
    let generator = RecordingGenerator::replying("vi sim");
    let (session, mut events) = test_session(&generator);

    let sent = session.send_text("1", "viu minha msg?").await.unwrap();
    assert_eq!(sent.delivery_status, DeliveryStatus::Sent);
    sleep(SETTLE).await;

    {
        let store = session.store();
        let store = store.lock().await;
        let outgoing = &store.messages("1")[0];
        assert_eq!(outgoing.id, sent.id);
        assert_eq!(outgoing.delivery_status, DeliveryStatus::Read);
    }

    let statuses: Vec<DeliveryStatus> = collect_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ChatEvent::StatusChanged { message_id, status, .. } if message_id == sent.id => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![DeliveryStatus::Delivered, DeliveryStatus::Read]);
}

#[tokio::test(start_paused = true)]
async fn test_typing_indicator_brackets_the_reply() {
    let generator = RecordingGenerator::replying("pronto");
    let (session, mut events) = test_session(&generator);

    session.send_text("1", "oi").await.unwrap();

    // Past the debounce window, inside the think time
    sleep(Duration::from_millis(3600)).await;
    {
        let store = session.store();
        let store = store.lock().await;
        assert!(store.is_typing("1"));
        assert!(generator.requests().is_empty());
    }

    sleep(SETTLE).await;
    let typing: Vec<bool> = collect_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ChatEvent::TypingChanged { contact_id, typing } if contact_id == "1" => Some(typing),
            _ => None,
        })
        .collect();
    assert_eq!(typing, vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_history_is_limited() {
    let generator = RecordingGenerator::replying("ok");
    let (session, _events) = test_session(&generator);

    {
        let store = session.store();
        let mut store = store.lock().await;
        for i in 0..20 {
            let message = Message::new(Sender::Them, Some(format!("old {}", i)), None, 1_000 + i).unwrap();
            store.append("1", message).unwrap();
        }
    }

    session.send_text("1", "novidade").await.unwrap();
    sleep(SETTLE).await;

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    let history = &requests[0].history;
    assert_eq!(history.len(), 15);
    assert_eq!(history.last().unwrap().text.as_deref(), Some("novidade"));
    assert_eq!(history[0].text.as_deref(), Some("old 6"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_batch() {
    let generator = RecordingGenerator::replying("nunca");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "oi").await.unwrap();
    sleep(Duration::from_secs(1)).await;
    session.shutdown();
    sleep(SETTLE).await;

    assert!(generator.requests().is_empty());
    assert_eq!(session.accumulator().pending_fragments("1"), 0);
    assert!(session.send_text("1", "ainda aí?").await.is_err());

    let store = session.store();
    let store = store.lock().await;
    assert_eq!(store.messages("1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_reply_in_flight() {
    let generator = RecordingGenerator::replying("nunca");
    let (session, _events) = test_session(&generator);

    session.send_text("1", "oi").await.unwrap();
    // Debounce has fired, the persona is still thinking
    sleep(Duration::from_millis(4000)).await;
    session.shutdown();
    sleep(SETTLE).await;

    assert!(generator.requests().is_empty());
    let store = session.store();
    let store = store.lock().await;
    assert!(store.messages("1").iter().all(|m| m.sender == Sender::Me));
}

#[tokio::test(start_paused = true)]
async fn test_accumulator_with_custom_timing() {
    setup_logging();
    let generator = RecordingGenerator::replying("rápido");
    let store = Arc::new(TokioMutex::new(common::test_store(MemoryKeyValueStore::new())));
    let config = AccumulatorConfig {
        debounce: Duration::from_millis(500),
        think_time_min: Duration::ZERO,
        think_time_max: Duration::ZERO,
        delimiter: " / ".to_string(),
        ..AccumulatorConfig::default()
    };
    let accumulator = MessageAccumulator::new(config, store.clone(), Arc::new(generator.clone()), "Ana");
    assert_eq!(accumulator.config().delimiter, " / ");

    assert!(accumulator.submit("1", Fragment::text("um")));
    assert!(accumulator.submit("1", Fragment::text("dois")));
    sleep(Duration::from_millis(400)).await;
    assert!(generator.requests().is_empty());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(generator.texts(), vec!["um / dois".to_string()]);
    assert_eq!(store.lock().await.messages("1").len(), 1);

    accumulator.shutdown();
    assert!(!accumulator.submit("1", Fragment::text("tres")));
}

#[tokio::test(start_paused = true)]
async fn test_reply_only_marks_its_own_batch_read() {
    setup_logging();
    let generator = RecordingGenerator::replying("respondido");
    let mut config = common::test_config();
    config.accumulator.think_time_min = Duration::from_secs(5);
    config.accumulator.think_time_max = Duration::from_secs(5);
    let session = persona_chat::ChatSession::new(
        common::test_store(MemoryKeyValueStore::new()),
        Arc::new(generator.clone()),
        config,
        None,
    );

    // First batch drains at 3.5 s and is answered at 8.5 s
    let first = session.send_text("1", "primeira").await.unwrap();
    sleep(Duration::from_secs(6)).await;
    // Sent while the first reply is thinking, drains at 9.5 s
    let second = session.send_text("1", "segunda").await.unwrap();
    sleep(Duration::from_secs(3)).await;

    {
        let store = session.store();
        let store = store.lock().await;
        let status = |id: &str| {
            store
                .messages("1")
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.delivery_status)
        };
        assert_eq!(generator.texts(), vec!["primeira".to_string()]);
        assert_eq!(status(&first.id), Some(DeliveryStatus::Read));
        assert_eq!(status(&second.id), Some(DeliveryStatus::Sent));
    }

    sleep(SETTLE).await;
    let store = session.store();
    let store = store.lock().await;
    assert!(store
        .messages("1")
        .iter()
        .filter(|m| m.sender == Sender::Me)
        .all(|m| m.delivery_status == DeliveryStatus::Read));
}
