//! Pub/sub transport interface
//!
//! A transport creates and binds publish and subscribe sockets. Sockets are
//! blocking: `send` returns once the message has been handed to every
//! connected peer, `recv` waits for the next message.

use bytes::Bytes;
use crossbeam_channel::{after, never, select, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::NetworkError;
use crate::network::endpoint::Endpoint;

static NEXT_SOCKET_ID: AtomicU32 = AtomicU32::new(1);

/// Process-local handle identifying a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u32);

impl SocketId {
    pub fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A bound publish-pattern socket
pub trait PublishSocket: Send + Sync {
    fn id(&self) -> SocketId;

    /// Fan `payload` out to every connected subscriber, returning its length
    fn send(&self, payload: &[u8]) -> Result<usize, NetworkError>;

    fn close(&self);
}

/// A bound subscribe-pattern socket
pub trait SubscribeSocket: Send + Sync {
    fn id(&self) -> SocketId;

    /// Receive one message into `buf`.
    ///
    /// Returns the full message length; messages longer than `buf` are
    /// truncated.
    fn recv(&self, buf: &mut [u8], options: &RecvOptions) -> Result<usize, NetworkError>;

    fn close(&self);
}

/// Socket factory
pub trait Transport: Send + Sync {
    type Publisher: PublishSocket;
    type Subscriber: SubscribeSocket;

    fn bind_publisher(&self, endpoint: &Endpoint) -> Result<Self::Publisher, NetworkError>;

    fn bind_subscriber(&self, endpoint: &Endpoint) -> Result<Self::Subscriber, NetworkError>;
}

/// Cancels blocking receives from another thread
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    // Dropping the sender disconnects the channel, waking every waiter
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// How long a receive may wait.
///
/// The default waits indefinitely and cannot be cancelled.
#[derive(Debug, Clone, Default)]
pub struct RecvOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl RecvOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Wait on `inbox` for one message and copy it into `buf`
pub(crate) fn recv_into(
    inbox: &Receiver<Bytes>,
    buf: &mut [u8],
    options: &RecvOptions,
) -> Result<usize, NetworkError> {
    let cancel = match &options.cancel {
        Some(token) if token.is_cancelled() => return Err(NetworkError::Cancelled),
        Some(token) => token.signal().clone(),
        None => never(),
    };
    let deadline = options.timeout.map(after).unwrap_or_else(never);

    let message = select! {
        recv(inbox) -> msg => msg.map_err(|_| NetworkError::Closed)?,
        recv(cancel) -> _ => return Err(NetworkError::Cancelled),
        recv(deadline) -> _ => return Err(NetworkError::Timeout),
    };

    let copied = message.len().min(buf.len());
    buf[..copied].copy_from_slice(&message[..copied]);
    Ok(message.len())
}
