//! Control channel receiver
//!
//! Waits for one message on the control socket. The payload is not
//! interpreted; only its arrival is reported.

use tracing::debug;

use crate::constants::CONTROL_BUFFER_SIZE;
use crate::error::Result;
use crate::network::{RecvOptions, SocketManager, SubscribeSocket, Transport};

/// Arrival of one control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSignal {
    /// Size of the message as sent
    pub len: usize,
    /// The message did not fit the receive buffer
    pub truncated: bool,
}

pub struct ControlReceiver<'a, T: Transport> {
    sockets: &'a SocketManager<T>,
}

impl<'a, T: Transport> ControlReceiver<'a, T> {
    pub fn new(sockets: &'a SocketManager<T>) -> Self {
        Self { sockets }
    }

    /// Block until the next control message arrives
    pub fn receive_control_signal(&self) -> Result<ControlSignal> {
        self.receive_control_signal_with(&RecvOptions::default())
    }

    /// Like `receive_control_signal`, bounded by `options`' timeout and
    /// cancellation token
    pub fn receive_control_signal_with(&self, options: &RecvOptions) -> Result<ControlSignal> {
        let socket = self.sockets.subscriber()?;
        let mut buf = [0u8; CONTROL_BUFFER_SIZE];
        let len = socket.recv(&mut buf, options)?;
        debug!("control message of {} bytes on socket {}", len, socket.id());
        Ok(ControlSignal {
            len,
            truncated: len > buf.len(),
        })
    }
}
