//! Keypad buttons: read the definition, subscribe, turn edges into actions

use super::mock_controller::{MockController, MockControllerHandle, Reply};
use crate::secure_session;
use leap_client::session::MockConnector;
use leap_client::trigger::{event_url, watch_button, ButtonAddress, ButtonDefinition};
use leap_client::{ButtonAction, ButtonTrigger, Settings, TriggerEvent, TriggerOptions};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const PROCESSOR: &str = "01A2B3C4";
const BUTTON_EVENT: &str = "OneButtonStatusEvent";

const SETTINGS: &str = r#"
[trigger]
double_click_speed_ms = 300
click_speed_ms = 450

[buttons."Good Night"]
click_speed_ms = 0
"#;

fn button(href: &str, name: &str, engraving: &str) -> Value {
    json!({
        "Button": {
            "href": href,
            "Name": name,
            "ButtonNumber": 1,
            "Engraving": { "Text": engraving }
        }
    })
}

fn edge(edge: &str) -> Value {
    json!({ "ButtonStatus": { "ButtonEvent": { "EventType": edge } } })
}

async fn press(controller: &MockControllerHandle, href: &str, edges: &[&str]) {
    for e in edges {
        controller.publish(&event_url(href), BUTTON_EVENT, edge(e)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_button_actions_follow_configured_windows() {
    let settings = Settings::from_toml_str(SETTINGS).unwrap();

    let connector = MockConnector::new();
    let controller = MockController::new(connector.push_link())
        .route("/button/101", Reply::ok("OneButtonDefinition", button("/button/101", "Button 1", "Good\nNight")))
        .route("/button/102", Reply::ok("OneButtonDefinition", button("/button/102", "Button 2", "Scene")))
        .route(&event_url("/button/101"), Reply::ok(BUTTON_EVENT, edge("Release")))
        .route(&event_url("/button/102"), Reply::ok(BUTTON_EVENT, edge("Release")))
        .spawn();
    let (session, _events) = secure_session(connector);
    session.connect().await.unwrap();

    let (action_tx, mut action_rx) = mpsc::channel::<TriggerEvent>(16);
    for (index, href) in ["/button/101", "/button/102"].into_iter().enumerate() {
        let address: ButtonAddress = session.read(href).await.unwrap();
        let definition = ButtonDefinition::new(PROCESSOR, &address, index as u32 + 1, false);
        let options = TriggerOptions::resolve(&settings, &definition.name, definition.raise_lower);
        let trigger = ButtonTrigger::spawn(definition, options, action_tx.clone());
        watch_button(&session, href, trigger).await.unwrap();
    }
    assert_eq!(session.subscriptions().len(), 2);

    // Long-press timing disabled for this button: the press is reported at once
    press(&controller, "/button/101", &["Press"]).await;
    let event = action_rx.recv().await.unwrap();
    assert_eq!(event.button.id, "LEAP-01A2B3C4-BUTTON-101");
    assert_eq!(event.button.name, "Good Night");
    assert_eq!(event.action, ButtonAction::Press);

    // Held past the click window
    press(&controller, "/button/102", &["Press"]).await;
    let event = action_rx.recv().await.unwrap();
    assert_eq!(event.button.name, "Scene");
    assert_eq!(event.action, ButtonAction::LongPress);

    press(&controller, "/button/102", &["Release"]).await;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert!(action_rx.try_recv().is_err());
}
