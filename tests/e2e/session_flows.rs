//! Request, subscription and reconnect flows against the mock controller

use super::mock_controller::{MockController, Reply};
use crate::{next_event, secure_session, zone_status, ZoneStatus, ZONE_STATUS};
use leap_client::session::MockConnector;
use leap_client::{Error, SessionEvent};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

const ZONE: &str = "/zone/1/status";

#[tokio::test]
async fn test_connect_emits_connect_event() {
    let connector = MockConnector::new();
    let _controller = MockController::new(connector.push_link()).spawn();
    let (session, mut events) = secure_session(connector);

    session.connect().await.unwrap();

    match next_event(&mut events).await {
        Some(SessionEvent::Connect { protocol }) => assert_eq!(protocol, "TLSv1.3"),
        other => panic!("expected Connect, got {:?}", other),
    }
    assert!(session.is_connected());
    assert!(session.is_secure());
}

#[tokio::test]
async fn test_subscription_survives_reconnect() {
    let connector = MockConnector::new();
    let first = MockController::new(connector.push_link())
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(10)))
        .spawn();
    let (session, mut events) = secure_session(connector.clone());

    session.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Connect { .. })
    ));

    let (level_tx, mut level_rx) = mpsc::unbounded_channel();
    session
        .subscribe(ZONE, move |status: ZoneStatus| {
            let _ = level_tx.send(status.level);
        })
        .await
        .unwrap();
    assert_eq!(session.subscriptions(), vec![ZONE.to_string()]);

    // The acknowledgement itself is not an update
    first.publish(ZONE, ZONE_STATUS, zone_status(42)).await;
    assert_eq!(level_rx.recv().await, Some(42));

    // Controller drops the link; a second one is waiting
    let mut second = MockController::new(connector.push_link())
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(42)))
        .spawn();
    first.drop_connection().await;

    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Disconnect)
    ));
    assert!(!session.is_connected());

    session.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Connect { .. })
    ));

    let replayed = second.next_request().await.unwrap();
    assert_eq!(replayed["CommuniqueType"], "SubscribeRequest");
    assert_eq!(replayed["Header"]["Url"], ZONE);
    assert_eq!(session.subscriptions(), vec![ZONE.to_string()]);

    second.publish(ZONE, ZONE_STATUS, zone_status(77)).await;
    assert_eq!(level_rx.recv().await, Some(77));
    assert!(level_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_resolve_out_of_order() {
    let connector = MockConnector::new();
    let _controller = MockController::new(connector.push_link())
        .route(
            "/zone/1/status",
            Reply::delayed(Duration::from_millis(200), ZONE_STATUS, zone_status(1)),
        )
        .route("/zone/2/status", Reply::ok(ZONE_STATUS, zone_status(2)))
        .spawn();
    let (session, _events) = secure_session(connector);
    session.connect().await.unwrap();

    let (slow, fast) = tokio::join!(
        session.read::<ZoneStatus>("/zone/1/status"),
        session.read::<ZoneStatus>("/zone/2/status"),
    );

    assert_eq!(slow.unwrap(), ZoneStatus { level: 1 });
    assert_eq!(fast.unwrap(), ZoneStatus { level: 2 });
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_requests_time_out_and_session_stays_usable() {
    let connector = MockConnector::new();
    let _controller = MockController::new(connector.push_link())
        .route("/area/1/status", Reply::Silent)
        .route("/zone/1/commandprocessor", Reply::Silent)
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(5)))
        .spawn();
    let (session, _events) = secure_session(connector);
    session.connect().await.unwrap();

    let err = session
        .read::<serde_json::Value>("/area/1/status")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Request timeout");

    // Commands settle even when the controller never answers
    let command = json!({ "Command": { "CommandType": "GoToLevel" } });
    session
        .command("/zone/1/commandprocessor", &command)
        .await
        .unwrap();

    assert_eq!(session.pending_requests(), 0);
    assert_eq!(
        session.read::<ZoneStatus>(ZONE).await.unwrap(),
        ZoneStatus { level: 5 }
    );
}

#[tokio::test]
async fn test_read_failures() {
    let connector = MockConnector::new();
    let _controller = MockController::new(connector.push_link())
        .route("/zone/9/status", Reply::Empty)
        .spawn();
    let (session, _events) = secure_session(connector);
    session.connect().await.unwrap();

    let err = session
        .read::<ZoneStatus>("/zone/9/status")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "/zone/9/status no body");

    let err = session.read::<ZoneStatus>("/missing").await.unwrap_err();
    assert!(matches!(err, Error::Exception { .. }));
    assert_eq!(err.to_string(), "/missing not found");
}

#[tokio::test]
async fn test_update_returns_reply_body() {
    let connector = MockConnector::new();
    let mut controller = MockController::new(connector.push_link())
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(60)))
        .spawn();
    let (session, _events) = secure_session(connector);
    session.connect().await.unwrap();

    let status: ZoneStatus = session
        .update(ZONE, &json!({ "ZoneStatus": { "Level": 60 } }))
        .await
        .unwrap();
    assert_eq!(status.level, 60);

    let request = controller.next_request().await.unwrap();
    assert_eq!(request["CommuniqueType"], "UpdateRequest");
    assert_eq!(request["Body"]["ZoneStatus"]["Level"], 60);
}

#[tokio::test]
async fn test_rejected_subscription_is_not_kept() {
    let connector = MockConnector::new();
    let _controller = MockController::new(connector.push_link()).spawn();
    let (session, _events) = secure_session(connector);
    session.connect().await.unwrap();

    let err = session
        .subscribe("/zone/404/status", |_: ZoneStatus| {})
        .await
        .unwrap_err();

    match err {
        Error::Subscribe { url, .. } => assert_eq!(url, "/zone/404/status"),
        other => panic!("expected Subscribe error, got {:?}", other),
    }
    assert!(session.subscriptions().is_empty());
}

#[tokio::test]
async fn test_disconnect_is_silent_and_forgets_subscriptions() {
    let connector = MockConnector::new();
    let controller = MockController::new(connector.push_link())
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(1)))
        .spawn();
    let (session, mut events) = secure_session(connector);
    session.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Connect { .. })
    ));

    session.subscribe(ZONE, |_: ZoneStatus| {}).await.unwrap();
    session.disconnect();

    controller.closed().await;
    assert!(session.subscriptions().is_empty());
    assert!(!session.is_connected());
    assert!(next_event(&mut events).await.is_none());
}

#[tokio::test]
async fn test_failed_replay_is_retried_on_next_reconnect() {
    let connector = MockConnector::new();
    let first = MockController::new(connector.push_link())
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(1)))
        .spawn();
    let (session, mut events) = secure_session(connector.clone());
    session.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Connect { .. })
    ));

    let (level_tx, mut level_rx) = mpsc::unbounded_channel();
    session
        .subscribe(ZONE, move |status: ZoneStatus| {
            let _ = level_tx.send(status.level);
        })
        .await
        .unwrap();

    // The second controller rejects the replayed subscription
    let mut second = MockController::new(connector.push_link())
        .route(ZONE, Reply::exception("503 ServiceUnavailable", "busy"))
        .spawn();
    first.drop_connection().await;
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Disconnect)
    ));

    session.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Connect { .. })
    ));
    let replayed = second.next_request().await.unwrap();
    assert_eq!(replayed["CommuniqueType"], "SubscribeRequest");
    assert_eq!(session.subscriptions(), vec![ZONE.to_string()]);

    // A third controller accepts it and updates flow again
    let third = MockController::new(connector.push_link())
        .route(ZONE, Reply::ok(ZONE_STATUS, zone_status(1)))
        .spawn();
    second.drop_connection().await;
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Disconnect)
    ));

    session.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Connect { .. })
    ));

    third.publish(ZONE, ZONE_STATUS, zone_status(88)).await;
    assert_eq!(level_rx.recv().await, Some(88));
}
