//! Tokio driver for button triggers.
//!
//! Each [`ButtonTrigger`] owns one background task holding the button's
//! [`Trigger`]. Edges and timer expiries are both delivered to that task, so
//! they are serialized without locking.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use leap_core::prelude::*;

use crate::button::ButtonDefinition;
use crate::clock::{Scheduler, TimerToken};
use crate::trigger::{ButtonAction, ButtonEdge, Trigger, TriggerOptions};

const INPUT_CHANNEL_CAPACITY: usize = 32;

/// An action produced by one button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub button: ButtonDefinition,
    pub action: ButtonAction,
}

#[derive(Debug)]
enum TriggerInput {
    Edge(ButtonEdge),
    Reset,
}

/// Scheduler backed by tokio sleeps; expiries come back over a channel.
struct TokioScheduler {
    fired_tx: mpsc::UnboundedSender<TimerToken>,
    timers: HashMap<TimerToken, JoinHandle<()>>,
}

impl TokioScheduler {
    fn new(fired_tx: mpsc::UnboundedSender<TimerToken>) -> Self {
        Self {
            fired_tx,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, token: TimerToken, delay: Duration) {
        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(token);
        });
        self.timers.insert(token, handle);
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(handle) = self.timers.remove(&token) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

/// Handle to a running button trigger. Clones feed the same trigger.
#[derive(Debug, Clone)]
pub struct ButtonTrigger {
    definition: ButtonDefinition,
    input_tx: mpsc::Sender<TriggerInput>,
}

impl ButtonTrigger {
    /// Start the trigger task; actions are sent to `action_tx`.
    ///
    /// The task stops when every handle has been dropped.
    pub fn spawn(
        definition: ButtonDefinition,
        options: TriggerOptions,
        action_tx: mpsc::Sender<TriggerEvent>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        tokio::spawn(run_trigger(
            definition.clone(),
            options,
            input_rx,
            action_tx,
        ));

        Self {
            definition,
            input_tx,
        }
    }

    pub fn definition(&self) -> &ButtonDefinition {
        &self.definition
    }

    /// Feed one edge, waiting for queue space.
    pub async fn update(&self, edge: ButtonEdge) -> Result<()> {
        self.input_tx
            .send(TriggerInput::Edge(edge))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Feed one edge without waiting; for use from synchronous callbacks.
    pub fn try_update(&self, edge: ButtonEdge) -> Result<()> {
        self.input_tx
            .try_send(TriggerInput::Edge(edge))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::protocol(format!("{} edge queue full", self.definition.id))
                }
                mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
            })
    }

    /// Force the trigger back to Idle, dropping any armed timer.
    pub async fn reset(&self) -> Result<()> {
        self.input_tx
            .send(TriggerInput::Reset)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

async fn run_trigger(
    definition: ButtonDefinition,
    options: TriggerOptions,
    mut input_rx: mpsc::Receiver<TriggerInput>,
    action_tx: mpsc::Sender<TriggerEvent>,
) {
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let mut trigger = Trigger::new(options, TokioScheduler::new(fired_tx));

    debug!("Trigger started for {}", definition.id);

    loop {
        let action = tokio::select! {
            input = input_rx.recv() => match input {
                Some(TriggerInput::Edge(edge)) => trigger.update(edge),
                Some(TriggerInput::Reset) => {
                    trigger.reset();
                    None
                }
                None => break,
            },
            Some(token) = fired_rx.recv() => trigger.fire(token),
        };

        if let Some(action) = action {
            debug!("{} {:?}", definition.id, action);
            let event = TriggerEvent {
                button: definition.clone(),
                action,
            };
            if action_tx.send(event).await.is_err() {
                debug!("Action receiver dropped for {}", definition.id);
                break;
            }
        }
    }

    trigger.reset();
    debug!("Trigger stopped for {}", definition.id);
}
