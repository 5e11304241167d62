//! Bridge status data from certain models of LiFePO4 Battery Management
//! Systems over Bluetooth Low Energy to an MQTT-style telemetry channel.
//!
//! Tested with an Ultimatron-branded battery sold around the year 2023.
//!
//! The BMS has a BLE interface exposing a notify characteristic (`ff01`) and
//! a write characteristic (`ff02`). On top of that it speaks a proprietary
//! command-response protocol which has been partially reverse engineered:
//! messages are framed by fixed start/end marker bytes, responses arrive
//! fragmented across notifications, and all multi-byte fields are big-endian
//! signed 16-bit. There is no checksum beyond the markers.
//!
//! Currently the following data can be accessed:
//!
//! - Battery voltage (V) and current (A)
//! - Remaining and full charge, with a derived charged percentage
//! - Two temperature probes (°C)
//! - Charge/discharge MOSFET states, which can also be switched
//! - Per-cell voltages (mV)
//! - The device name
//!
//! # Example
//!
//! ```no_run
//! use battebridge::{BatterySession, BleTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = BleTransport::new().await?;
//!     let mut session = BatterySession::new(transport, "ULT-1234");
//!     let mut messages = session.subscribe();
//!     session.start_reading_battery_state(Duration::from_secs(5));
//!
//!     tokio::spawn(async move {
//!         while let Some(message) = messages.recv().await {
//!             println!("{message:?}");
//!         }
//!     });
//!
//!     session.start().await?;
//!     session.run().await
//! }
//! ```

mod battery_session;
mod ble;
mod bridge;
mod command;
mod error;
mod frame;
mod message;
mod transport;

pub use battery_session::{BatterySession, SessionHandle, SessionState};
pub use ble::{BleTransport, BleWriter};
pub use bridge::{Bridge, Publisher};
pub use command::Command;
pub use error::{DecodeError, SetupError};
pub use frame::{FrameDecoder, RawFrame, FRAME_END, FRAME_START};
pub use message::{BatteryState, CellState, DeviceInfo, Message};
pub use transport::{Transport, WriteChannel};
