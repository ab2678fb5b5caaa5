//! Button definitions and the subscription that feeds their triggers.

use serde::{Deserialize, Serialize};

use leap_core::prelude::*;
use leap_session::{Connector, Session};

use crate::driver::ButtonTrigger;
use crate::trigger::ButtonEdge;

/// Engraving printed on a keypad button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Engraving {
    #[serde(default)]
    pub text: Option<String>,
}

/// A button as described by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ButtonAddress {
    #[serde(rename = "href")]
    pub href: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub button_number: Option<u32>,
    #[serde(default)]
    pub engraving: Option<Engraving>,
}

impl ButtonAddress {
    /// Engraving text if present, otherwise the button name, on one line.
    pub fn display_name(&self) -> String {
        let name = self
            .engraving
            .as_ref()
            .and_then(|e| e.text.as_deref())
            .filter(|text| !text.is_empty())
            .unwrap_or(self.name.as_str());
        name.replace('\n', " ")
    }
}

/// Identity reported with every trigger action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonDefinition {
    /// `LEAP-<processor>-BUTTON-<button id>`
    pub id: String,
    pub index: u32,
    pub name: String,
    pub raise_lower: bool,
}

impl ButtonDefinition {
    pub fn new(processor_id: &str, button: &ButtonAddress, index: u32, raise_lower: bool) -> Self {
        let button_id = button.href.split('/').nth(2).unwrap_or_default();
        Self {
            id: format!("LEAP-{}-BUTTON-{}", processor_id, button_id),
            index,
            name: button.display_name(),
            raise_lower,
        }
    }
}

/// Body of a button status event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ButtonStatus {
    pub button_event: ButtonEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ButtonEvent {
    pub event_type: ButtonEdge,
}

/// URL carrying hardware edges for the button at `href`.
pub fn event_url(href: &str) -> String {
    format!("{}/status/event", href)
}

/// Subscribe to the button at `href` and feed every edge into `trigger`.
///
/// The subscription lives as long as the session and is restored on
/// reconnect.
pub async fn watch_button<C>(session: &Session<C>, href: &str, trigger: ButtonTrigger) -> Result<()>
where
    C: Connector + Sync + 'static,
{
    let url = event_url(href);
    debug!("Watching {} for {}", url, trigger.definition().id);

    session
        .subscribe(&url, move |status: ButtonStatus| {
            if let Err(e) = trigger.try_update(status.button_event.event_type) {
                warn!("Dropped edge for {}: {}", trigger.definition().id, e);
            }
        })
        .await
}
