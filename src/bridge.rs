//! Forwards decoded messages to a telemetry publisher.
//!
//! The publish channel itself (broker, tunnel, its reconnect behavior) lives
//! outside this crate; the bridge only shapes topics and payloads and hands
//! them over.

use crate::message::{BatteryState, Message};
use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The outbound telemetry boundary: a topic plus a serialized payload.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

/// Battery state as published, extended with the derived fields.
#[derive(Serialize)]
struct BatteryStateRecord<'a> {
    #[serde(flatten)]
    state: &'a BatteryState,
    /// Instantaneous power in W, negative while discharging
    power: f32,
    /// Remaining charge as a percentage of full, rounded
    charged_percentage: i64,
}

impl<'a> BatteryStateRecord<'a> {
    fn new(state: &'a BatteryState) -> Self {
        let charged_percentage = if state.full == 0 {
            0
        } else {
            (f64::from(state.charge) / f64::from(state.full) * 100.0).round() as i64
        };
        Self {
            state,
            power: state.voltage * state.current,
            charged_percentage,
        }
    }
}

/// Couples a session's message channel to a [`Publisher`].
///
/// Topics are the configured prefix plus a fixed per-message suffix:
/// `<prefix>/batterystate`, `<prefix>/cellstate` and `<prefix>/info`.
pub struct Bridge<P: Publisher> {
    publisher: P,
    topic_prefix: String,
    messages: mpsc::UnboundedReceiver<Message>,
}

impl<P: Publisher> Bridge<P> {
    pub fn new(
        publisher: P,
        topic_prefix: &str,
        messages: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            publisher,
            topic_prefix: topic_prefix.to_string(),
            messages,
        }
    }

    /// Forward messages until the session side closes the channel.
    ///
    /// Delivery is not guaranteed: a failed publish is logged and the
    /// message dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.messages.recv().await {
            if let Err(err) = self.forward(&message).await {
                warn!("failed to publish {message:?}: {err:#}");
            }
        }
        debug!("session channel closed, bridge done");
    }

    async fn forward(&mut self, message: &Message) -> Result<()> {
        let (suffix, payload) = match message {
            Message::BatteryState(state) => (
                "batterystate",
                serde_json::to_string(&BatteryStateRecord::new(state))?,
            ),
            Message::CellState(state) => ("cellstate", serde_json::to_string(state)?),
            Message::DeviceInfo(info) => ("info", serde_json::to_string(info)?),
        };
        let topic = format!("{}/{suffix}", self.topic_prefix);
        debug!("publishing to {topic}");
        self.publisher.publish(&topic, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CellState, DeviceInfo};
    use std::sync::{Arc, Mutex};

    type Published = Arc<Mutex<Vec<(String, String)>>>;

    struct MockPublisher {
        published: Published,
        fail: bool,
    }

    impl Publisher for MockPublisher {
        async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            if self.fail {
                anyhow::bail!("broker unreachable");
            }
            Ok(())
        }
    }

    fn battery_state() -> BatteryState {
        BatteryState {
            voltage: 50.0,
            current: 2.0,
            temp1: 20.0,
            temp2: 21.0,
            charge: 80,
            full: 100,
            charge_on: true,
            discharge_on: false,
        }
    }

    async fn run_bridge(messages: Vec<Message>, fail: bool) -> Published {
        let published = Published::default();
        let publisher = MockPublisher {
            published: published.clone(),
            fail,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        for message in messages {
            tx.send(message).unwrap();
        }
        drop(tx);

        Bridge::new(publisher, "home/battery", rx).run().await;
        published
    }

    #[tokio::test]
    async fn test_battery_state_topic_and_derived_fields() {
        let published = run_bridge(vec![Message::BatteryState(battery_state())], false).await;
        let published = published.lock().unwrap();

        let (topic, payload) = &published[0];
        assert_eq!(topic, "home/battery/batterystate");

        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["voltage"], 50.0);
        assert_eq!(value["current"], 2.0);
        assert_eq!(value["charge"], 80);
        assert_eq!(value["full"], 100);
        assert_eq!(value["charge_on"], true);
        assert_eq!(value["discharge_on"], false);
        assert_eq!(value["power"], 100.0);
        assert_eq!(value["charged_percentage"], 80);
    }

    #[tokio::test]
    async fn test_cell_state_payload() {
        let state = CellState {
            numcells: 2,
            cells: vec![3301, 3302],
        };
        let published = run_bridge(vec![Message::CellState(state)], false).await;
        let published = published.lock().unwrap();

        let (topic, payload) = &published[0];
        assert_eq!(topic, "home/battery/cellstate");
        assert_eq!(payload, r#"{"numcells":2,"cells":[3301,3302]}"#);
    }

    #[tokio::test]
    async fn test_device_info_payload() {
        let info = DeviceInfo {
            name: "ULT-1234".to_string(),
        };
        let published = run_bridge(vec![Message::DeviceInfo(info)], false).await;
        let published = published.lock().unwrap();

        let (topic, payload) = &published[0];
        assert_eq!(topic, "home/battery/info");
        assert_eq!(payload, r#"{"name":"ULT-1234"}"#);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_the_bridge() {
        let messages = vec![
            Message::BatteryState(battery_state()),
            Message::BatteryState(battery_state()),
        ];
        let published = run_bridge(messages, true).await;
        // both messages were attempted despite the first failing
        assert_eq!(published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_charged_percentage_with_zero_full_charge() {
        let mut state = battery_state();
        state.full = 0;
        let published = run_bridge(vec![Message::BatteryState(state)], false).await;
        let published = published.lock().unwrap();

        let value: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(value["charged_percentage"], 0);
    }
}
