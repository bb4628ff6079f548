//! # Connection
//!
//! Purpose: Own one TCP socket to the server and execute commands on it,
//! allowing several requests in flight while guaranteeing that the N-th
//! caller reads the N-th response.
//!
//! ## Design Principles
//! 1. **Decoupled Send/Receive**: Requests are written back-to-back under
//!    the send lock; responses are consumed one at a time in send order.
//! 2. **Ordering Token**: Each caller joins a capacity-1 FIFO semaphore while
//!    still holding the send lock, so queue order equals wire order.
//! 3. **Never Silently Reused**: Any failure during connect, send, receive or
//!    an abandoned in-flight request moves the connection to `Faulted`;
//!    every later call fails fast naming that state.
//!
//! ## Lifecycle
//!
//! ```text
//! Unopened -> Opening -> Open -> Closed
//!                 \         \
//!                  +---------+--> Faulted
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{ClientError, ClientResult};
use crate::pool::Resource;
use crate::reader::ResponseReader;
use crate::semaphore::{AsyncSemaphore, SemaphoreGuard};
use crate::timeout::with_timeout;
use crate::transport::TcpTransport;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Unopened,
    Opening,
    Open,
    Closed,
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unopened => "unopened",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// A single connection to the server.
pub struct Connection {
    endpoint: SocketAddr,
    receive_timeout: Option<Duration>,
    state: Mutex<ConnectionState>,
    // Held while a request is written and its ordering token is taken.
    sender: tokio::sync::Mutex<Option<TcpTransport>>,
    receiver: tokio::sync::Mutex<Option<ResponseReader<OwnedReadHalf>>>,
    ordering: AsyncSemaphore,
}

impl Connection {
    /// Creates an unopened connection to `endpoint`.
    pub fn new(endpoint: SocketAddr, receive_timeout: Option<Duration>) -> Self {
        Connection {
            endpoint,
            receive_timeout,
            state: Mutex::new(ConnectionState::Unopened),
            sender: tokio::sync::Mutex::new(None),
            receiver: tokio::sync::Mutex::new(None),
            ordering: AsyncSemaphore::new(1),
        }
    }

    /// Creates and opens a connection.
    pub async fn connect(
        endpoint: SocketAddr,
        connect_timeout: Option<Duration>,
        receive_timeout: Option<Duration>,
    ) -> ClientResult<Self> {
        let connection = Connection::new(endpoint, receive_timeout);
        connection.open(connect_timeout).await?;
        Ok(connection)
    }

    /// Remote endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Connects the socket. Only valid from `Unopened`.
    pub async fn open(&self, connect_timeout: Option<Duration>) -> ClientResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Unopened {
                return Err(ClientError::InvalidState(*state));
            }
            *state = ConnectionState::Opening;
        }

        let endpoint = self.endpoint;
        let stream = with_timeout("connect", connect_timeout, async move {
            let stream = TcpStream::connect(endpoint).await?;
            stream.set_nodelay(true)?;
            Ok::<_, ClientError>(stream)
        })
        .await;

        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "connect failed");
                self.transition(ConnectionState::Faulted);
                return Err(err);
            }
        };

        let (read_half, write_half) = stream.into_split();
        *self.sender.lock().await = Some(TcpTransport::new(write_half));
        *self.receiver.lock().await =
            Some(ResponseReader::with_receive_timeout(read_half, self.receive_timeout));

        let opened = {
            let mut state = self.state.lock();
            if *state == ConnectionState::Opening {
                *state = ConnectionState::Open;
                Ok(())
            } else {
                Err(ClientError::InvalidState(*state))
            }
        };
        if let Err(err) = opened {
            // Closed while connecting; the halves were stored after close ran.
            self.sender.lock().await.take();
            self.receiver.lock().await.take();
            return Err(err);
        }
        debug!(endpoint = %self.endpoint, "connection open");
        Ok(())
    }

    /// Sends `command` and reads its response.
    ///
    /// Sending happens as soon as the send lock is free, even while earlier
    /// responses are still outstanding; the response is read only after
    /// every earlier caller has read theirs.
    pub async fn execute<C: Command>(&self, mut command: C) -> ClientResult<C::Output> {
        let mut in_flight = InFlight {
            connection: self,
            armed: false,
            turn: None,
        };

        let turn = {
            let mut sender = self.sender.lock().await;
            self.ensure_open_holding(&mut *sender)?;
            let transport = match sender.as_mut() {
                Some(transport) => transport,
                None => return Err(ClientError::InvalidState(self.state())),
            };
            let turn = self.ordering.wait_and_signal();
            in_flight.armed = true;
            if let Err(err) = command.send_request(transport).await {
                warn!(
                    endpoint = %self.endpoint,
                    verb = command.verb(),
                    error = %err,
                    "send failed"
                );
                *sender = None;
                in_flight.fault();
                return Err(err);
            }
            self.release_if_finished(&mut *sender);
            turn
        };

        // Held by the guard so a fault lands before the next caller's turn.
        in_flight.turn = Some(turn.await);
        let mut receiver = self.receiver.lock().await;
        self.ensure_open_holding(&mut *receiver)?;
        let reader = match receiver.as_mut() {
            Some(reader) => reader,
            None => return Err(ClientError::InvalidState(self.state())),
        };
        match command.read_response(reader).await {
            Ok(output) => {
                in_flight.armed = false;
                self.release_if_finished(&mut *receiver);
                Ok(output)
            }
            Err(err) => {
                warn!(
                    endpoint = %self.endpoint,
                    verb = command.verb(),
                    error = %err,
                    "receive failed"
                );
                *receiver = None;
                in_flight.fault();
                Err(err)
            }
        }
    }

    /// Closes the connection; later calls fail with `InvalidState(Closed)`.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.release_socket();
        debug!(endpoint = %self.endpoint, "connection closed");
    }

    /// Fails unless `Open`. `half` is the socket half whose lock the caller
    /// holds; it is dropped if the connection already faulted or closed.
    fn ensure_open_holding<H>(&self, half: &mut Option<H>) -> ClientResult<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            state => {
                self.release_if_finished(half);
                Err(ClientError::InvalidState(state))
            }
        }
    }

    // A fault raised while another call held this lock could not drop it.
    fn release_if_finished<H>(&self, half: &mut Option<H>) {
        if matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Faulted
        ) {
            half.take();
        }
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }

    fn fault(&self) {
        self.transition(ConnectionState::Faulted);
        self.release_socket();
    }

    // Halves held by an in-progress call are dropped by that call instead.
    fn release_socket(&self) {
        if let Ok(mut sender) = self.sender.try_lock() {
            sender.take();
        }
        if let Ok(mut receiver) = self.receiver.try_lock() {
            receiver.take();
        }
    }
}

impl Resource for Connection {
    fn close(&self) {
        Connection::close(self);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Faults the connection if a request was sent but its response was never
/// fully read, including when the caller drops the future mid-flight.
struct InFlight<'a> {
    connection: &'a Connection,
    armed: bool,
    turn: Option<SemaphoreGuard<'a>>,
}

impl InFlight<'_> {
    fn fault(&mut self) {
        self.armed = false;
        self.connection.fault();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(endpoint = %self.connection.endpoint, "request abandoned in flight");
            self.connection.fault();
        }
        // The ordering turn passes on only after any fault above.
        self.turn.take();
    }
}
