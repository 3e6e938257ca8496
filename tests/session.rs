use std::sync::{Arc, Mutex};
use std::time::Duration;

use greenbox::greenbox::{DEFAULT_CHARACTERISTIC, FieldKind, FieldValue, LightStatus};
use greenbox::notifier::FieldChange;
use greenbox::transport::{MockCall, MockTransport};
use greenbox::{DeviceSession, EncodingError, Error, SessionConfig, SessionState, TransportError};
use macaddr::MacAddr6;

const ADDRESS: MacAddr6 = MacAddr6::new(0xc4, 0x4f, 0x33, 0x0a, 0x1b, 0x2c);

fn frame(register: u8, value: u16) -> Vec<u8> {
    let [hi, lo] = value.to_be_bytes();
    vec![0xee, register, hi, lo, 0x00, 0xef, 0x00]
}

fn water_level(level: u16) -> Vec<u8> {
    frame(0x41, level)
}

fn new_session(transport: &Arc<MockTransport>) -> DeviceSession<MockTransport> {
    DeviceSession::new(Arc::clone(transport), ADDRESS, SessionConfig::default())
}

async fn open_session(transport: &Arc<MockTransport>) -> DeviceSession<MockTransport> {
    let session = new_session(transport);
    session.open().await.expect("session should open");
    session
}

fn record_changes(session: &DeviceSession<MockTransport>) -> Arc<Mutex<Vec<FieldChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    session.subscribe(move |change| {
        sink.lock().unwrap().push(change.clone());
        Ok(())
    });
    changes
}

#[tokio::test]
async fn water_level_becomes_known_after_notification() {
    let transport = Arc::new(MockTransport::new());
    let session = new_session(&transport);
    assert_eq!(session.state(), SessionState::Disconnected);

    session.open().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(
        transport.calls(),
        vec![
            MockCall::Connect(ADDRESS),
            MockCall::Subscribe(DEFAULT_CHARACTERISTIC)
        ]
    );

    let changes = record_changes(&session);
    assert_eq!(session.get(FieldKind::WaterLevel), None);

    assert!(transport.notify(DEFAULT_CHARACTERISTIC, &water_level(42)));

    let reading = session.get(FieldKind::WaterLevel).unwrap();
    assert_eq!(reading.value, FieldValue::WaterLevel(42));
    assert_eq!(session.water_level(), Some(42));

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, FieldKind::WaterLevel);
    assert_eq!(changes[0].value, FieldValue::WaterLevel(42));
    assert_eq!(changes[0].updated_at, reading.updated_at);
}

#[tokio::test]
async fn repeated_value_fires_one_event() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    let changes = record_changes(&session);

    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(42));
    assert_eq!(changes.lock().unwrap().len(), 1);

    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(42));
    assert_eq!(changes.lock().unwrap().len(), 1);

    let diagnostics = session.diagnostics();
    assert_eq!(diagnostics.frames_received, 2);
    assert_eq!(diagnostics.fields_decoded, 2);
    assert_eq!(diagnostics.fields_changed, 1);
}

#[tokio::test]
async fn fields_accumulate_from_round_robin_frames() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;

    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x22, 60));
    transport.notify(DEFAULT_CHARACTERISTIC, &[0xee, 0x7f, 0x00]);
    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x31, 715));
    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x5a, 9));
    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x11, 3));

    assert_eq!(session.brightness(1), Some(60));
    assert_eq!(session.brightness(0), None);
    assert_eq!(
        session.wake_time(0),
        chrono::NaiveTime::from_hms_opt(7, 15, 0)
    );

    let snapshot = session.snapshot();
    assert_eq!(snapshot.light_status(), Some(LightStatus::Scheduled));
    assert_eq!(snapshot.any_lamp_lit(), Some(true));
    assert_eq!(snapshot.fields.len(), 3);

    let diagnostics = session.diagnostics();
    assert_eq!(diagnostics.truncated, 1);
    assert_eq!(diagnostics.unknown_register, 1);
    assert_eq!(session.frame_log().len(), 5);
    assert!(!session.is_stale(Duration::from_secs(20)));
}

#[tokio::test]
async fn out_of_range_brightness_never_reaches_transport() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;

    let result = session.set_brightness(0, 150).await;

    assert!(matches!(
        result,
        Err(Error::Encoding(EncodingError::BrightnessOutOfRange(150)))
    ));
    assert!(transport.writes().is_empty());
}

#[tokio::test]
async fn commands_outside_ready_are_rejected() {
    let transport = Arc::new(MockTransport::new());
    let session = new_session(&transport);

    let result = session.light_on().await;

    assert!(matches!(
        result,
        Err(Error::SessionNotReady(SessionState::Disconnected))
    ));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn commands_are_written_in_device_format() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;

    session.light_on().await.unwrap();
    session.set_brightness(1, 80).await.unwrap();
    session.set_wake_time(0, 6, 30).await.unwrap();

    assert_eq!(
        transport.writes(),
        vec![
            vec![0xee, 0x11, 0x00, 0x01, 0xc7, 0xef],
            vec![0xee, 0x22, 0x00, 0x50, 0x67, 0xef],
            vec![0xee, 0x31, 0x02, 0x76, 0x30, 0xef],
        ]
    );
    // Commands are not reflected until the device republishes.
    assert_eq!(session.brightness(1), None);
}

#[tokio::test]
async fn toggle_turns_known_lit_lights_off() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;

    session.toggle_light().await.unwrap();
    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x11, 1));
    session.toggle_light().await.unwrap();

    let writes = transport.writes();
    assert_eq!(writes[0][3], 0x01);
    assert_eq!(writes[1][3], 0x00);
}

#[tokio::test]
async fn failed_write_is_returned_without_retry() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    transport.fail_writes();

    let result = session.light_off().await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::WriteRejected(_)))
    ));
    assert_eq!(transport.writes().len(), 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn write_is_bounded_by_timeout() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    transport.hang_writes();

    let result = session.light_on().await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Timeout {
            operation: "write",
            ..
        }))
    ));
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_times_out() {
    let transport = Arc::new(MockTransport::new());
    transport.hang_connect();
    let session = new_session(&transport);

    let result = session.open().await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Timeout {
            operation: "connect",
            ..
        }))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn subscribe_is_bounded_by_timeout() {
    let transport = Arc::new(MockTransport::new());
    transport.hang_subscribe();
    let session = new_session(&transport);

    let result = session.open().await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Timeout {
            operation: "subscribe",
            ..
        }))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        transport.calls().last(),
        Some(&MockCall::Disconnect(ADDRESS))
    );
}

#[tokio::test]
async fn connect_failure_leaves_session_disconnected() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_connect();
    let session = new_session(&transport);

    let result = session.open().await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::DeviceNotFound(ADDRESS)))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(transport.calls(), vec![MockCall::Connect(ADDRESS)]);
}

#[tokio::test]
async fn subscribe_failure_releases_link() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_subscribe();
    let session = new_session(&transport);

    assert!(session.open().await.is_err());

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        transport.calls().last(),
        Some(&MockCall::Disconnect(ADDRESS))
    );
}

#[tokio::test]
async fn close_cancels_outstanding_write() {
    let transport = Arc::new(MockTransport::new());
    let session = Arc::new(open_session(&transport).await);
    transport.hang_writes();

    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.light_on().await })
    };
    while transport.writes().is_empty() {
        tokio::task::yield_now().await;
    }

    session.close().await.unwrap();

    let result = writer.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Cancelled))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);

    let calls = transport.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            MockCall::Unsubscribe(DEFAULT_CHARACTERISTIC),
            MockCall::Disconnect(ADDRESS)
        ]
    );
}

#[tokio::test]
async fn lost_link_forgets_state() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(42));

    transport.drop_link();

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.water_level(), None);
    assert!(matches!(
        session.light_on().await,
        Err(Error::SessionNotReady(SessionState::Disconnected))
    ));

    // A fresh open starts from an empty state.
    session.open().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.water_level(), None);
}

#[tokio::test]
async fn reopen_starts_without_liveness() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(42));
    assert!(session.last_activity().is_some());

    transport.drop_link();
    session.open().await.unwrap();

    assert_eq!(session.last_activity(), None);
    assert!(session.is_stale(Duration::from_secs(20)));
    // Diagnostics span the whole session object.
    assert_eq!(session.diagnostics().frames_received, 1);
    assert_eq!(session.frame_log().len(), 1);
}

#[tokio::test]
async fn quiet_link_becomes_stale() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(42));
    assert!(!session.is_stale(Duration::from_secs(20)));

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.is_stale(Duration::from_millis(10)));
    assert!(!session.is_stale(Duration::from_secs(20)));
}

#[tokio::test]
async fn weekend_program_is_written_and_read_back() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;

    session.set_weekend_wake_time(9, 15).await.unwrap();
    assert_eq!(
        transport.writes(),
        vec![vec![0xee, 0x35, 0x03, 0x93, 0x0e, 0xef]]
    );

    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x35, 915));
    transport.notify(DEFAULT_CHARACTERISTIC, &frame(0x36, 6));

    let snapshot = session.snapshot();
    assert_eq!(
        snapshot.weekend_wake_time(),
        chrono::NaiveTime::from_hms_opt(9, 15, 0)
    );
    assert_eq!(snapshot.weekend_program_enabled(), Some(true));
}

#[tokio::test]
async fn unsubscribed_callback_stops_receiving() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    let seen = Arc::new(Mutex::new(0));
    let id = {
        let seen = Arc::clone(&seen);
        session.subscribe(move |_| {
            *seen.lock().unwrap() += 1;
            Ok(())
        })
    };

    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(40));
    assert!(session.unsubscribe(id));
    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(41));

    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(session.water_level(), Some(41));
    assert!(!session.unsubscribe(id));
}

#[tokio::test]
async fn failing_subscriber_does_not_stop_ingestion() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;
    session.subscribe(|_| Err(anyhow::anyhow!("broker down")));
    let changes = record_changes(&session);

    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(40));
    transport.notify(DEFAULT_CHARACTERISTIC, &water_level(41));

    assert_eq!(session.water_level(), Some(41));
    assert_eq!(changes.lock().unwrap().len(), 2);
    assert_eq!(session.diagnostics().subscriber_failures, 2);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn scoped_session_closes_on_exit() {
    let transport = Arc::new(MockTransport::new());

    let level = DeviceSession::scoped(
        Arc::clone(&transport),
        ADDRESS,
        SessionConfig::default(),
        |session| {
            let transport = Arc::clone(&transport);
            async move {
                transport.notify(DEFAULT_CHARACTERISTIC, &water_level(55));
                session.water_level()
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(level, Some(55));
    assert!(!transport.is_subscribed());
    assert_eq!(
        transport.calls().last(),
        Some(&MockCall::Disconnect(ADDRESS))
    );
}

#[tokio::test]
async fn dropped_session_releases_link() {
    let transport = Arc::new(MockTransport::new());
    let session = open_session(&transport).await;

    drop(session);
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        transport.calls().last(),
        Some(&MockCall::Disconnect(ADDRESS))
    );
}
