//! Connection state machine for one publish cycle.
//!
//! The driver in [`super::publisher`] performs the I/O named by each
//! [`CycleAction`] and feeds the outcome back as a [`CycleEvent`]. The machine
//! itself never touches the network.
//!
//! ```text
//! Idle -> Connecting -> ChannelOpen -> ExchangeDeclared -> Closing -> Closed
//!             |              |               |
//!             v              +-------+-------+
//!           Failed            (interrupted) -> Closing -> Closed
//! ```

use tracing::{debug, error, info, warn};

use super::BusError;

/// Lifecycle of the broker connection within a single `publish()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Connection requested; also covers opening its channel.
    Connecting,
    ChannelOpen,
    ExchangeDeclared,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

/// Outcome of the last action, reported back by the driver.
#[derive(Debug)]
pub enum CycleEvent {
    ConnectionOpened,
    ConnectionOpenFailed(BusError),
    ChannelOpened,
    ExchangeDeclared,
    Flushed,
    /// Channel or connection went away while work was in progress.
    Interrupted(BusError),
    ConnectionClosed,
}

/// Next piece of I/O the driver must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    OpenConnection,
    OpenChannel,
    DeclareExchange,
    Flush,
    /// Close the channel (if any) then the connection (if still open).
    Close,
    Stop,
}

/// State machine for one connect / declare / flush / close cycle.
#[derive(Debug)]
pub struct PublishCycle {
    state: ConnectionState,
    exchange: String,
    failure: Option<BusError>,
}

impl PublishCycle {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Idle,
            exchange: exchange.into(),
            failure: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failure(&self) -> Option<&BusError> {
        self.failure.as_ref()
    }

    /// Idle -> Connecting.
    pub fn start(&mut self) -> CycleAction {
        if self.state != ConnectionState::Idle {
            warn!(state = ?self.state, "Publish cycle already started");
            return CycleAction::Stop;
        }
        self.state = ConnectionState::Connecting;
        CycleAction::OpenConnection
    }

    /// Advance the machine with the outcome of the previous action.
    pub fn handle(&mut self, event: CycleEvent) -> CycleAction {
        match (self.state, event) {
            (ConnectionState::Connecting, CycleEvent::ConnectionOpened) => {
                self.on_connection_open()
            }
            (ConnectionState::Connecting, CycleEvent::ConnectionOpenFailed(e)) => {
                self.on_connection_open_error(e)
            }
            (ConnectionState::Connecting, CycleEvent::ChannelOpened) => self.on_channel_open(),
            (ConnectionState::ChannelOpen, CycleEvent::ExchangeDeclared) => {
                self.on_exchange_declared()
            }
            (ConnectionState::ExchangeDeclared, CycleEvent::Flushed) => self.on_flushed(),
            (ConnectionState::Closing, CycleEvent::ConnectionClosed) => self.on_closed(),
            (ConnectionState::Closing, CycleEvent::Interrupted(e)) => {
                warn!(error = %e, "Error while closing connection");
                self.on_closed()
            }
            (
                ConnectionState::Connecting
                | ConnectionState::ChannelOpen
                | ConnectionState::ExchangeDeclared,
                CycleEvent::Interrupted(e),
            ) => self.on_interrupted(e),
            (state, event) if state.is_terminal() => {
                debug!(state = ?state, event = ?event, "Event after cycle terminated");
                CycleAction::Stop
            }
            (state, event) => self.on_interrupted(BusError::Closed(format!(
                "unexpected {:?} while {:?}",
                event, state
            ))),
        }
    }

    /// Consume the machine, yielding the recorded failure if any.
    pub fn finish(self) -> super::Result<()> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_connection_open(&mut self) -> CycleAction {
        info!("Connection opened");
        // Stays `Connecting` until the channel is open too.
        CycleAction::OpenChannel
    }

    fn on_connection_open_error(&mut self, error: BusError) -> CycleAction {
        error!(error = %error, "Failed to open connection");
        self.failure = Some(error);
        self.state = ConnectionState::Failed;
        CycleAction::Stop
    }

    fn on_channel_open(&mut self) -> CycleAction {
        info!("Channel opened");
        info!(exchange = %self.exchange, "Declaring exchange");
        self.state = ConnectionState::ChannelOpen;
        CycleAction::DeclareExchange
    }

    fn on_exchange_declared(&mut self) -> CycleAction {
        info!(exchange = %self.exchange, "Exchange declared");
        self.state = ConnectionState::ExchangeDeclared;
        CycleAction::Flush
    }

    fn on_flushed(&mut self) -> CycleAction {
        info!(exchange = %self.exchange, "Messages published");
        self.state = ConnectionState::Closing;
        CycleAction::Close
    }

    fn on_interrupted(&mut self, error: BusError) -> CycleAction {
        error!(state = ?self.state, error = %error, "Publish cycle interrupted");
        self.failure = Some(error);
        self.state = ConnectionState::Closing;
        CycleAction::Close
    }

    fn on_closed(&mut self) -> CycleAction {
        info!(exchange = %self.exchange, "Connection closed");
        self.state = ConnectionState::Closed;
        CycleAction::Stop
    }
}
