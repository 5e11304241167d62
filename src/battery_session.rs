//! A session with one BMS device: connection lifecycle, command polling and
//! typed message fan-out.

use crate::command::Command;
use crate::frame::FrameDecoder;
use crate::message::Message;
use crate::transport::{Transport, WriteChannel};
use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, info, trace, warn};

/// Where the session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connected,
    /// Both channels are live and inbound data is flowing.
    Subscribed,
}

/// Requests a [`SessionHandle`] can make of a running session.
#[derive(Debug, Clone, Copy)]
enum Control {
    StartBatteryPoll(Duration),
    StopBatteryPoll,
    StartCellPoll(Duration),
    StopCellPoll,
    Send(Command),
}

/// What the event loop selected.
enum Event {
    Data(Option<Result<Vec<u8>>>),
    Control(Control),
    BatteryTick,
    CellTick,
}

/// A periodic command poll. The first tick fires one full period after the
/// poll is started.
struct PollTimer {
    period: Duration,
    interval: Interval,
}

impl PollTimer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            interval: interval_at(Instant::now() + period, period),
        }
    }
}

async fn tick(poll: &mut Option<PollTimer>) {
    match poll {
        Some(poll) => {
            poll.interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// A session with one BMS device.
///
/// The session owns the transport and a frame decoder, drives the
/// Idle → Scanning → Connected → Subscribed lifecycle, polls the device on
/// the configured periods and fans decoded messages out to subscribers.
///
/// All protocol state is mutated from one place: [`run`](BatterySession::run)
/// is a single-owner event loop, and everything else happens before it starts
/// or arrives through a [`SessionHandle`] and is applied by the loop in
/// arrival order.
pub struct BatterySession<T: Transport> {
    transport: T,
    device_name: String,
    state: SessionState,
    want_connected: bool,
    decoder: FrameDecoder,
    data: Option<T::Data>,
    writer: Option<T::Writer>,
    battery_poll: Option<PollTimer>,
    cell_poll: Option<PollTimer>,
    subscribers: Vec<mpsc::UnboundedSender<Message>>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

impl<T: Transport> BatterySession<T> {
    pub fn new(transport: T, device_name: &str) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            device_name: device_name.to_string(),
            state: SessionState::Idle,
            want_connected: false,
            decoder: FrameDecoder::new(),
            data: None,
            writer: None,
            battery_poll: None,
            cell_poll: None,
            subscribers: Vec::new(),
            control_tx,
            control_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether [`start`](BatterySession::start) has been requested. The
    /// session itself never reconnects; whoever drives it can consult this
    /// after [`run`](BatterySession::run) returns to decide whether to scan
    /// again.
    pub fn wants_connection(&self) -> bool {
        self.want_connected
    }

    /// Receive every decoded message. Each subscriber gets its own copy.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// A clonable remote control for use while [`run`](BatterySession::run)
    /// owns the session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            control: self.control_tx.clone(),
        }
    }

    /// Scan for the device, connect, and subscribe to its notifications.
    ///
    /// No-op when the session is already scanning or connected. A device
    /// without both the read and the write characteristic is unusable, so a
    /// missing channel ([`SetupError`](crate::SetupError)) is fatal: the
    /// error propagates and the session is not half-started.
    pub async fn start(&mut self) -> Result<()> {
        self.want_connected = true;
        if self.state != SessionState::Idle {
            debug!("start ignored, session is {:?}", self.state);
            return Ok(());
        }

        self.state = SessionState::Scanning;
        info!("scanning for {}", self.device_name);
        self.transport.scan_for(&self.device_name).await?;
        info!("device {} discovered", self.device_name);

        self.transport.connect().await?;
        self.state = SessionState::Connected;
        info!("connected to device");

        let (data, writer) = self.transport.open_channels().await?;
        self.data = Some(data);
        self.writer = Some(writer);
        // fresh accumulator per connection
        self.decoder = FrameDecoder::new();
        self.state = SessionState::Subscribed;
        info!("subscribed to device notifications");
        Ok(())
    }

    /// Process inbound data, poll ticks and handle requests until the device
    /// link drops.
    ///
    /// Returns `Ok(())` when the transport ends the data stream (the session
    /// goes back to `Idle` and can be started again) and an error when the
    /// transport reports one.
    pub async fn run(&mut self) -> Result<()> {
        let mut data = self
            .data
            .take()
            .ok_or(anyhow!("session is not subscribed"))?;

        loop {
            let event = tokio::select! {
                chunk = data.next() => Event::Data(chunk),
                Some(control) = self.control_rx.recv() => Event::Control(control),
                _ = tick(&mut self.battery_poll) => Event::BatteryTick,
                _ = tick(&mut self.cell_poll) => Event::CellTick,
            };

            match event {
                Event::Data(Some(Ok(chunk))) => self.on_data(&chunk),
                Event::Data(Some(Err(err))) => {
                    self.writer = None;
                    self.state = SessionState::Idle;
                    return Err(err);
                }
                Event::Data(None) => {
                    info!("device closed the notification stream");
                    self.writer = None;
                    self.state = SessionState::Idle;
                    return Ok(());
                }
                Event::Control(control) => self.on_control(control).await?,
                Event::BatteryTick => self.send_command(Command::RequestRead).await?,
                Event::CellTick => self.send_command(Command::RequestCellVoltage).await?,
            }
        }
    }

    /// Write a command to the device.
    ///
    /// When no write channel is established the command is dropped: not
    /// queued, not retried. Polling a device that is still connecting is
    /// normal, so this is not an error.
    pub async fn send_command(&mut self, command: Command) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            trace!("dropping {command:?}, no write channel");
            return Ok(());
        };
        trace!("tx {}", hex::encode(command.bytes()));
        writer.write(command.bytes()).await
    }

    /// Ask the device for its info record.
    pub async fn request_battery_info(&mut self) -> Result<()> {
        self.send_command(Command::RequestInfo).await
    }

    /// Switch the charge MOSFET.
    pub async fn set_charge(&mut self, on: bool) -> Result<()> {
        let command = if on { Command::ChargeOn } else { Command::ChargeOff };
        self.send_command(command).await
    }

    /// Switch the discharge MOSFET.
    pub async fn set_discharge(&mut self, on: bool) -> Result<()> {
        let command = if on { Command::DischargeOn } else { Command::DischargeOff };
        self.send_command(command).await
    }

    /// Begin requesting the battery state every `period`. At most one
    /// battery poll runs at a time; when one is already running this is a
    /// no-op and the running period is kept.
    pub fn start_reading_battery_state(&mut self, period: Duration) {
        if let Some(poll) = &self.battery_poll {
            debug!("battery state poll already running every {:?}", poll.period);
            return;
        }
        self.battery_poll = Some(PollTimer::new(period));
    }

    /// Stop the battery state poll. No-op when none is running.
    pub fn stop_reading_battery_state(&mut self) {
        if self.battery_poll.take().is_some() {
            debug!("battery state poll stopped");
        }
    }

    /// Begin requesting the cell voltages every `period`. At most one cell
    /// poll runs at a time; when one is already running this is a no-op and
    /// the running period is kept.
    pub fn start_reading_cell_state(&mut self, period: Duration) {
        if let Some(poll) = &self.cell_poll {
            debug!("cell state poll already running every {:?}", poll.period);
            return;
        }
        self.cell_poll = Some(PollTimer::new(period));
    }

    /// Stop the cell voltages poll. No-op when none is running.
    pub fn stop_reading_cell_state(&mut self) {
        if self.cell_poll.take().is_some() {
            debug!("cell state poll stopped");
        }
    }

    fn on_data(&mut self, chunk: &[u8]) {
        trace!("rx {}", hex::encode(chunk));
        if let Some(frame) = self.decoder.feed(chunk) {
            match Message::decode(&frame) {
                Ok(message) => self.dispatch(message),
                Err(err) => {
                    // the offending frame is discarded, the session lives on
                    warn!("discarding frame {}: {err}", hex::encode(frame.as_bytes()));
                }
            }
        }
    }

    fn dispatch(&mut self, message: Message) {
        debug!("decoded {message:?}");
        self.subscribers
            .retain(|subscriber| subscriber.send(message.clone()).is_ok());
    }

    async fn on_control(&mut self, control: Control) -> Result<()> {
        match control {
            Control::StartBatteryPoll(period) => self.start_reading_battery_state(period),
            Control::StopBatteryPoll => self.stop_reading_battery_state(),
            Control::StartCellPoll(period) => self.start_reading_cell_state(period),
            Control::StopCellPoll => self.stop_reading_cell_state(),
            Control::Send(command) => self.send_command(command).await?,
        }
        Ok(())
    }
}

/// Clonable remote control for a session whose event loop is running.
///
/// Requests are applied by the loop in arrival order. They are fire and
/// forget: a handle outliving its session sends into the void.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: mpsc::UnboundedSender<Control>,
}

impl SessionHandle {
    pub fn send_command(&self, command: Command) {
        let _ = self.control.send(Control::Send(command));
    }

    pub fn request_battery_info(&self) {
        self.send_command(Command::RequestInfo);
    }

    pub fn set_charge(&self, on: bool) {
        self.send_command(if on { Command::ChargeOn } else { Command::ChargeOff });
    }

    pub fn set_discharge(&self, on: bool) {
        self.send_command(if on { Command::DischargeOn } else { Command::DischargeOff });
    }

    pub fn start_reading_battery_state(&self, period: Duration) {
        let _ = self.control.send(Control::StartBatteryPoll(period));
    }

    pub fn stop_reading_battery_state(&self) {
        let _ = self.control.send(Control::StopBatteryPoll);
    }

    pub fn start_reading_cell_state(&self, period: Duration) {
        let _ = self.control.send(Control::StartCellPoll(period));
    }

    pub fn stop_reading_cell_state(&self) {
        let _ = self.control.send(Control::StopCellPoll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SetupError;
    use crate::message::Message;
    use futures_util::stream::{self, BoxStream};
    use std::sync::{Arc, Mutex};

    const INFO_FRAME: [u8; 16] = [
        0xdd, 0x05, 0x00, 0x08, b'U', b'L', b'T', b'-', b'1', b'2', b'3', b'4', 0x00, 0x00, 0x00,
        0x77,
    ];

    type Written = Arc<Mutex<Vec<Vec<u8>>>>;

    struct MockTransport {
        chunks: Vec<Vec<u8>>,
        keep_open: bool,
        has_write: bool,
        written: Written,
    }

    impl MockTransport {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks,
                keep_open: false,
                has_write: true,
                written: Written::default(),
            }
        }
    }

    struct MockWriter(Written);

    impl WriteChannel for MockWriter {
        async fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    impl Transport for MockTransport {
        type Data = BoxStream<'static, Result<Vec<u8>>>;
        type Writer = MockWriter;

        async fn scan_for(&mut self, _device_name: &str) -> Result<()> {
            Ok(())
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn open_channels(&mut self) -> Result<(Self::Data, Self::Writer)> {
            if !self.has_write {
                return Err(SetupError::MissingWriteChannel("mock".to_string()).into());
            }
            let chunks = std::mem::take(&mut self.chunks).into_iter().map(Ok);
            let data: Self::Data = if self.keep_open {
                stream::iter(chunks).chain(stream::pending()).boxed()
            } else {
                stream::iter(chunks).boxed()
            };
            Ok((data, MockWriter(self.written.clone())))
        }
    }

    #[tokio::test]
    async fn test_lifecycle_and_chunked_messages() {
        // one message split across chunks, then the link drops
        let transport = MockTransport::new(vec![INFO_FRAME[..6].to_vec(), INFO_FRAME[6..].to_vec()]);
        let mut session = BatterySession::new(transport, "ULT-1234");
        let mut messages = session.subscribe();

        assert_eq!(session.state(), SessionState::Idle);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Subscribed);
        assert!(session.wants_connection());

        session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let message = messages.recv().await.unwrap();
        assert!(matches!(message, Message::DeviceInfo(info) if info.name == "ULT-1234"));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut session = BatterySession::new(MockTransport::new(vec![]), "ULT-1234");
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Subscribed);
        // second start must not re-run the connect sequence
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Subscribed);
    }

    #[tokio::test]
    async fn test_missing_write_channel_is_fatal() {
        let mut transport = MockTransport::new(vec![]);
        transport.has_write = false;
        let mut session = BatterySession::new(transport, "ULT-1234");

        let err = session.start().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<SetupError>(),
            Some(&SetupError::MissingWriteChannel("mock".to_string()))
        );
        assert_ne!(session.state(), SessionState::Subscribed);
    }

    #[tokio::test]
    async fn test_command_without_write_channel_is_dropped() {
        let transport = MockTransport::new(vec![]);
        let written = transport.written.clone();
        let mut session = BatterySession::new(transport, "ULT-1234");

        // never started, so no write channel exists
        session.send_command(Command::RequestRead).await.unwrap();
        session.set_charge(true).await.unwrap();
        assert!(written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_poll_start_is_a_no_op() {
        let mut session = BatterySession::new(MockTransport::new(vec![]), "ULT-1234");

        session.start_reading_battery_state(Duration::from_millis(100));
        session.start_reading_battery_state(Duration::from_millis(200));
        assert_eq!(
            session.battery_poll.as_ref().unwrap().period,
            Duration::from_millis(100)
        );

        session.stop_reading_battery_state();
        assert!(session.battery_poll.is_none());
        // stop with nothing running is a no-op
        session.stop_reading_battery_state();

        session.start_reading_battery_state(Duration::from_millis(200));
        assert_eq!(
            session.battery_poll.as_ref().unwrap().period,
            Duration::from_millis(200)
        );
    }

    #[tokio::test]
    async fn test_polls_issue_commands() {
        let mut transport = MockTransport::new(vec![]);
        transport.keep_open = true;
        let written = transport.written.clone();
        let mut session = BatterySession::new(transport, "ULT-1234");

        session.start().await.unwrap();
        session.start_reading_battery_state(Duration::from_millis(10));
        session.start_reading_cell_state(Duration::from_millis(10));

        tokio::select! {
            result = session.run() => panic!("run ended: {result:?}"),
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }

        let written = written.lock().unwrap();
        assert!(written.iter().any(|w| w == Command::RequestRead.bytes()));
        assert!(written.iter().any(|w| w == Command::RequestCellVoltage.bytes()));
    }

    #[tokio::test]
    async fn test_handle_controls_running_session() {
        let mut transport = MockTransport::new(vec![]);
        transport.keep_open = true;
        let written = transport.written.clone();
        let mut session = BatterySession::new(transport, "ULT-1234");
        let handle = session.handle();

        session.start().await.unwrap();
        handle.set_charge(true);
        handle.request_battery_info();

        tokio::select! {
            result = session.run() => panic!("run ended: {result:?}"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        let written = written.lock().unwrap();
        assert_eq!(written[0], Command::ChargeOn.bytes());
        assert_eq!(written[1], Command::RequestInfo.bytes());
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_end_session() {
        // an unknown command frame followed by a good one
        let bad = vec![0xdd, 0x09, 0x00, 0x00, 0x00, 0x77];
        let transport = MockTransport::new(vec![bad, INFO_FRAME.to_vec()]);
        let mut session = BatterySession::new(transport, "ULT-1234");
        let mut messages = session.subscribe();

        session.start().await.unwrap();
        session.run().await.unwrap();

        let message = messages.recv().await.unwrap();
        assert!(matches!(message, Message::DeviceInfo(_)));
        assert!(messages.try_recv().is_err());
    }
}
