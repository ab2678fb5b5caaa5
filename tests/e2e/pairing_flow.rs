//! Pairing over a physical connection

use super::mock_controller::MockController;
use leap_client::core::SessionSettings;
use leap_client::session::{pair_session, MockConnector};
use leap_client::{Certificate, CertificateRequest, Error, Session, SessionEvent, SessionMode};
use std::time::Duration;
use tokio::sync::mpsc;

fn physical_session(
    connector: MockConnector,
) -> (Session<MockConnector>, mpsc::Receiver<SessionEvent>) {
    let (tx, rx) = mpsc::channel(16);
    let session = Session::with_connector(
        connector,
        SessionMode::Physical,
        SessionSettings::default(),
        tx,
    );
    (session, rx)
}

#[tokio::test]
async fn test_pairing_returns_signed_certificate() {
    let connector = MockConnector::new();
    let mut controller = MockController::new(connector.push_link())
        .physical_access(true)
        .signs_with("ROOT-PEM", "CLIENT-PEM")
        .spawn();
    let (session, _events) = physical_session(connector);

    let request = CertificateRequest::new("CSR-PEM", "KEY-PEM");
    let certificate = pair_session(&session, &request).await.unwrap();

    assert_eq!(
        certificate,
        Certificate::new("ROOT-PEM", "KEY-PEM", "CLIENT-PEM")
    );

    let csr = controller.next_request().await.unwrap();
    assert_eq!(csr["Header"]["RequestType"], "Execute");
    assert_eq!(csr["Body"]["Parameters"]["CSR"], "CSR-PEM");
    assert!(!session.is_connected());

    controller.closed().await;
}

#[tokio::test]
async fn test_pairing_denied_without_physical_access() {
    let connector = MockConnector::new();
    let controller = MockController::new(connector.push_link())
        .physical_access(false)
        .spawn();
    let (session, _events) = physical_session(connector);

    let err = pair_session(&session, &CertificateRequest::new("CSR", "KEY"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Pairing { .. }));
    assert_eq!(err.to_string(), "Pairing error: Unknown pairing error");
    controller.closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_pairing_times_out_waiting_for_button() {
    let connector = MockConnector::new();
    let _controller = MockController::new(connector.push_link()).spawn();
    let (session, _events) = physical_session(connector);

    let started = tokio::time::Instant::now();
    let err = pair_session(&session, &CertificateRequest::new("CSR", "KEY"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PhysicalAccessTimeout));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_pairing_fails_when_controller_unreachable() {
    let (session, _events) = physical_session(MockConnector::new());

    let err = pair_session(&session, &CertificateRequest::new("CSR", "KEY"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
}
