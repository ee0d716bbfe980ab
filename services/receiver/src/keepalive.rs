//! Liveness state machine for the relay connection (spec §4.2):
//! `Idle -> Armed -> AwaitingAck -> Armed`, closing the connection with
//! code 3001 if an ack never arrives.
//!
//! This struct does no I/O. The reactor loop in [`crate::receiver`] calls
//! into it at the right points and acts on the state/deadlines it reports.

use tokio::time::{Duration, Instant};

pub const PING_INTERVAL: Duration = Duration::from_secs(50);
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);
pub const TIMEOUT_CLOSE_CODE: u16 = 3001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaState {
    Idle,
    Armed,
    AwaitingAck,
}

#[derive(Debug)]
pub struct KeepAlive {
    pub path: String,
    pub disconnect: bool,
    state: KaState,
    ping_deadline: Instant,
    ack_deadline: Option<Instant>,
}

impl KeepAlive {
    pub fn new(path: impl Into<String>, disconnect: bool) -> Self {
        Self {
            path: path.into(),
            disconnect,
            state: KaState::Idle,
            ping_deadline: Instant::now(),
            ack_deadline: None,
        }
    }

    pub fn state(&self) -> KaState {
        self.state
    }

    /// Arms the ping timer. Called on connection open and on every
    /// inbound frame -- the keep-alive resets on any sign of life from
    /// the relay, not only its own ack.
    pub fn on_open_or_inbound_frame(&mut self) {
        self.state = KaState::Armed;
        self.ping_deadline = Instant::now() + PING_INTERVAL;
    }

    /// The ping timer fired; the reactor is about to send the keep-alive
    /// request. Arms the ack timer.
    pub fn on_ping_fired(&mut self) {
        self.state = KaState::AwaitingAck;
        self.ack_deadline = Some(Instant::now() + ACK_TIMEOUT);
    }

    /// A 2xx arrived for the outstanding keep-alive request.
    pub fn on_ack_ok(&mut self) {
        self.ack_deadline = None;
        self.on_open_or_inbound_frame();
    }

    /// The ack timer fired with no matching response.
    pub fn on_ack_timeout(&mut self) {
        self.ack_deadline = None;
    }

    pub fn on_close(&mut self) {
        self.state = KaState::Idle;
        self.ack_deadline = None;
    }

    pub fn ping_deadline(&self) -> Instant {
        self.ping_deadline
    }

    pub fn ack_deadline(&self) -> Option<Instant> {
        self.ack_deadline
    }
}
