//! TCP pub/sub transport
//!
//! Both socket kinds bind a listener and accept peers on a background thread.
//! A publisher writes every message to all accepted subscribers; a subscriber
//! reads from all accepted publishers into a single inbox.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol as IpProtocol, Socket, Type};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::endpoint::Endpoint;
use crate::network::transport::{
    recv_into, PublishSocket, RecvOptions, SocketId, SubscribeSocket, Transport,
};
use crate::network::wire::{self, Protocol};

/// How often accept loops check for shutdown
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Socket tuning shared by both socket kinds
#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub listen_backlog: i32,
    pub handshake_timeout: Duration,
    /// Upper bound on a blocked write to one subscriber
    pub send_timeout: Duration,
    pub max_message_size: usize,
    /// Capacity of a subscribe socket's inbox
    pub receive_queue_len: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for TcpOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            listen_backlog: config.listen_backlog,
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            max_message_size: config.max_message_size,
            receive_queue_len: config.receive_queue_len,
        }
    }
}

/// Create, bind and listen on a TCP socket
fn bind_listener(endpoint: &Endpoint, backlog: i32) -> Result<(TcpListener, SocketAddr), NetworkError> {
    let addr = endpoint.socket_addr()?;
    let bind_failed = |e: io::Error| NetworkError::BindFailed {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(IpProtocol::TCP))
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))?;
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket.listen(backlog).map_err(bind_failed)?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))?;

    let listener: TcpListener = socket.into();
    let local_addr = listener
        .local_addr()
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))?;
    Ok((listener, local_addr))
}

/// Put an accepted stream into blocking mode and complete the handshake
fn accept_peer(
    mut stream: TcpStream,
    local: Protocol,
    options: &TcpOptions,
) -> Result<TcpStream, NetworkError> {
    let setup = |e: io::Error| NetworkError::ConnectionFailed(e.to_string());
    stream.set_nonblocking(false).map_err(setup)?;
    stream.set_nodelay(true).map_err(setup)?;
    stream
        .set_read_timeout(Some(options.handshake_timeout))
        .map_err(setup)?;
    stream
        .set_write_timeout(Some(options.handshake_timeout))
        .map_err(setup)?;

    wire::handshake(&mut stream, local)?;

    stream.set_read_timeout(None).map_err(setup)?;
    stream
        .set_write_timeout(Some(options.send_timeout))
        .map_err(setup)?;
    Ok(stream)
}

/// Accept connections until `running` is cleared, running `on_peer` on a
/// thread of its own for each so a stalled handshake never blocks the next
/// accept
fn spawn_accept_loop<F>(
    name: String,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    on_peer: F,
) -> Result<JoinHandle<()>, NetworkError>
where
    F: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
{
    let on_peer = Arc::new(on_peer);
    let peer_name = format!("{}-peer", name);
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        let on_peer = on_peer.clone();
                        let spawned = thread::Builder::new()
                            .name(peer_name.clone())
                            .spawn(move || on_peer(stream, addr));
                        if let Err(e) = spawned {
                            warn!("could not start handler for {}: {}", addr, e);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                }
            }
        })
        .map_err(|e| NetworkError::SocketFailed(e.to_string()))
}

/// Transport over plain TCP
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    options: TcpOptions,
}

impl TcpTransport {
    pub fn new(options: TcpOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TcpOptions {
        &self.options
    }
}

impl Transport for TcpTransport {
    type Publisher = TcpPublisher;
    type Subscriber = TcpSubscriber;

    fn bind_publisher(&self, endpoint: &Endpoint) -> Result<TcpPublisher, NetworkError> {
        TcpPublisher::bind(endpoint, self.options.clone())
    }

    fn bind_subscriber(&self, endpoint: &Endpoint) -> Result<TcpSubscriber, NetworkError> {
        TcpSubscriber::bind(endpoint, self.options.clone())
    }
}

struct Subscriber {
    stream: TcpStream,
    addr: SocketAddr,
}

/// Publish socket
pub struct TcpPublisher {
    id: SocketId,
    local_addr: SocketAddr,
    peers: Arc<Mutex<Vec<Subscriber>>>,
    running: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl TcpPublisher {
    pub fn bind(endpoint: &Endpoint, options: TcpOptions) -> Result<Self, NetworkError> {
        let (listener, local_addr) = bind_listener(endpoint, options.listen_backlog)?;
        let id = SocketId::next();
        let peers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let accepted = peers.clone();
        let open = running.clone();
        let handle = spawn_accept_loop(
            format!("pub-accept-{}", id.as_u32()),
            listener,
            running.clone(),
            move |stream, addr| match accept_peer(stream, Protocol::Pub, &options) {
                Ok(stream) => {
                    let mut peers = accepted.lock();
                    if !open.load(Ordering::SeqCst) {
                        let _ = stream.shutdown(Shutdown::Both);
                        return;
                    }
                    debug!("subscriber {} connected", addr);
                    peers.push(Subscriber { stream, addr });
                }
                Err(e) => warn!("rejected peer {}: {}", addr, e),
            },
        )?;

        info!("publisher {} bound to {} ({})", id, endpoint, local_addr);
        Ok(Self {
            id,
            local_addr,
            peers,
            running,
            accept_handle: Mutex::new(Some(handle)),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            messages: self.messages_sent.load(Ordering::Relaxed),
            bytes: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

impl PublishSocket for TcpPublisher {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send(&self, payload: &[u8]) -> Result<usize, NetworkError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }

        let frame = wire::encode_message(payload);
        let mut peers = self.peers.lock();
        peers.retain_mut(|peer| match peer.stream.write_all(&frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("dropping subscriber {}: {}", peer.addr, e);
                let _ = peer.stream.shutdown(Shutdown::Both);
                false
            }
        });

        // With no subscribers the message is simply dropped
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        Ok(payload.len())
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for peer in self.peers.lock().drain(..) {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.join();
        }
        info!("publisher {} closed", self.id);
    }
}

impl Drop for TcpPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscribe socket
pub struct TcpSubscriber {
    id: SocketId,
    local_addr: SocketAddr,
    inbox: Receiver<Bytes>,
    /// Write handles of connected publishers, keyed by connection
    peers: Arc<Mutex<HashMap<u64, TcpStream>>>,
    running: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    messages_dropped: Arc<AtomicU64>,
}

impl TcpSubscriber {
    pub fn bind(endpoint: &Endpoint, options: TcpOptions) -> Result<Self, NetworkError> {
        let (listener, local_addr) = bind_listener(endpoint, options.listen_backlog)?;
        let id = SocketId::next();
        let (inbox_tx, inbox) = bounded::<Bytes>(options.receive_queue_len);
        let peers: Arc<Mutex<HashMap<u64, TcpStream>>> = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));
        let messages_dropped = Arc::new(AtomicU64::new(0));

        let reader = PeerReader {
            peers: peers.clone(),
            open: running.clone(),
            inbox: inbox_tx,
            dropped: messages_dropped.clone(),
            max_message_size: options.max_message_size,
        };
        let next_peer = AtomicU64::new(0);
        let handle = spawn_accept_loop(
            format!("sub-accept-{}", id.as_u32()),
            listener,
            running.clone(),
            move |stream, addr| match accept_peer(stream, Protocol::Sub, &options) {
                Ok(stream) => {
                    let key = next_peer.fetch_add(1, Ordering::Relaxed);
                    reader.run(key, stream, addr);
                }
                Err(e) => warn!("rejected peer {}: {}", addr, e),
            },
        )?;

        info!("subscriber {} bound to {} ({})", id, endpoint, local_addr);
        Ok(Self {
            id,
            local_addr,
            inbox,
            peers,
            running,
            accept_handle: Mutex::new(Some(handle)),
            messages_dropped,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Messages discarded because the inbox was full
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }
}

/// Shared state for the per-publisher reader threads of one subscribe socket
struct PeerReader {
    peers: Arc<Mutex<HashMap<u64, TcpStream>>>,
    open: Arc<AtomicBool>,
    inbox: Sender<Bytes>,
    dropped: Arc<AtomicU64>,
    max_message_size: usize,
}

impl PeerReader {
    /// Register the peer, forward its messages into the inbox until it
    /// disconnects, then unregister it
    fn run(&self, key: u64, mut stream: TcpStream, addr: SocketAddr) {
        let handle = match stream.try_clone() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("rejected peer {}: {}", addr, e);
                return;
            }
        };
        {
            let mut peers = self.peers.lock();
            if !self.open.load(Ordering::SeqCst) {
                let _ = handle.shutdown(Shutdown::Both);
                return;
            }
            peers.insert(key, handle);
        }
        debug!("publisher {} connected", addr);

        loop {
            match wire::read_message(&mut stream, self.max_message_size) {
                Ok(message) => match self.inbox.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("inbox full, dropped message from {}", addr);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                },
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("publisher {} disconnected", addr);
                    break;
                }
                Err(e) => {
                    warn!("publisher {} dropped: {}", addr, e);
                    break;
                }
            }
        }

        if let Some(handle) = self.peers.lock().remove(&key) {
            let _ = handle.shutdown(Shutdown::Both);
        }
    }
}

impl SubscribeSocket for TcpSubscriber {
    fn id(&self) -> SocketId {
        self.id
    }

    fn recv(&self, buf: &mut [u8], options: &RecvOptions) -> Result<usize, NetworkError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }
        recv_into(&self.inbox, buf, options)
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for (_, peer) in self.peers.lock().drain() {
            let _ = peer.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.join();
        }
        info!("subscriber {} closed", self.id);
    }
}

impl Drop for TcpSubscriber {
    fn drop(&mut self) {
        self.close();
    }
}

/// Byte and message counters for one socket
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages: u64,
    pub bytes: u64,
}

/// Outbound connection to a bound socket.
///
/// Connect as `Protocol::Sub` to receive from a publisher, or as
/// `Protocol::Pub` to send to a subscriber.
pub struct PeerConnection {
    stream: TcpStream,
    protocol: Protocol,
    max_message_size: usize,
}

impl PeerConnection {
    pub fn connect(
        endpoint: &Endpoint,
        protocol: Protocol,
        options: &TcpOptions,
    ) -> Result<Self, NetworkError> {
        let addr = endpoint.socket_addr()?;
        let mut stream = TcpStream::connect_timeout(&addr, options.handshake_timeout)
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;
        let setup = |e: io::Error| NetworkError::ConnectionFailed(e.to_string());
        stream.set_nodelay(true).map_err(setup)?;
        stream
            .set_read_timeout(Some(options.handshake_timeout))
            .map_err(setup)?;

        wire::handshake(&mut stream, protocol)?;
        stream.set_read_timeout(None).map_err(setup)?;

        debug!("connected to {} as {:?}", endpoint, protocol);
        Ok(Self {
            stream,
            protocol,
            max_message_size: options.max_message_size,
        })
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<usize, NetworkError> {
        if self.protocol != Protocol::Pub {
            return Err(NetworkError::SendFailed("subscriber connections cannot send".into()));
        }
        self.stream
            .write_all(&wire::encode_message(payload))
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(payload.len())
    }

    pub fn recv(&mut self) -> Result<Bytes, NetworkError> {
        if self.protocol != Protocol::Sub {
            return Err(NetworkError::ReceiveFailed(
                "publisher connections cannot receive".into(),
            ));
        }
        wire::read_message(&mut self.stream, self.max_message_size).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                NetworkError::Closed
            } else {
                NetworkError::ReceiveFailed(e.to_string())
            }
        })
    }

    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<(), NetworkError> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> Endpoint {
        "tcp://127.0.0.1:0".parse().unwrap()
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_publish_fans_out() {
        let options = TcpOptions::default();
        let publisher = TcpPublisher::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(publisher.local_addr());

        let mut a = PeerConnection::connect(&endpoint, Protocol::Sub, &options).unwrap();
        let mut b = PeerConnection::connect(&endpoint, Protocol::Sub, &options).unwrap();
        wait_for(|| publisher.peer_count() == 2);

        assert_eq!(publisher.send(b"frame").unwrap(), 5);
        assert_eq!(&a.recv().unwrap()[..], b"frame");
        assert_eq!(&b.recv().unwrap()[..], b"frame");
        assert_eq!(publisher.stats().messages, 1);
    }

    #[test]
    fn test_send_without_subscribers_succeeds() {
        let publisher = TcpPublisher::bind(&loopback(), TcpOptions::default()).unwrap();
        assert_eq!(publisher.send(b"nobody listens").unwrap(), 14);
    }

    #[test]
    fn test_disconnected_subscriber_is_dropped() {
        let options = TcpOptions::default();
        let publisher = TcpPublisher::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(publisher.local_addr());

        let peer = PeerConnection::connect(&endpoint, Protocol::Sub, &options).unwrap();
        wait_for(|| publisher.peer_count() == 1);
        drop(peer);

        // The first writes after a reset may still succeed locally
        let deadline = Instant::now() + Duration::from_secs(5);
        while publisher.peer_count() > 0 {
            assert!(Instant::now() < deadline);
            publisher.send(&[0u8; 4096]).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_wrong_role_is_rejected() {
        let options = TcpOptions::default();
        let publisher = TcpPublisher::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(publisher.local_addr());

        let result = PeerConnection::connect(&endpoint, Protocol::Pub, &options);
        assert!(matches!(result, Err(NetworkError::HandshakeFailed(_))));
        assert_eq!(publisher.peer_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_from_connected_publisher() {
        let options = TcpOptions::default();
        let subscriber = TcpSubscriber::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(subscriber.local_addr());

        let mut controller = PeerConnection::connect(&endpoint, Protocol::Pub, &options).unwrap();
        controller.send(b"capture").unwrap();

        let mut buf = [0u8; 1024];
        let len = subscriber.recv(&mut buf, &RecvOptions::default()).unwrap();
        assert_eq!(&buf[..len], b"capture");
    }

    #[test]
    fn test_reconnecting_publishers_do_not_accumulate() {
        let options = TcpOptions::default();
        let subscriber = TcpSubscriber::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(subscriber.local_addr());

        for _ in 0..20 {
            let controller = PeerConnection::connect(&endpoint, Protocol::Pub, &options).unwrap();
            wait_for(|| subscriber.peer_count() == 1);
            drop(controller);
            wait_for(|| subscriber.peer_count() == 0);
        }
    }

    #[test]
    fn test_stalled_handshake_does_not_block_accept() {
        let options = TcpOptions {
            handshake_timeout: Duration::from_secs(2),
            ..TcpOptions::default()
        };
        let publisher = TcpPublisher::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(publisher.local_addr());

        // Connections that never send their handshake
        let silent: Vec<TcpStream> = (0..3)
            .map(|_| TcpStream::connect(publisher.local_addr()).unwrap())
            .collect();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        let _viewer = PeerConnection::connect(&endpoint, Protocol::Sub, &options).unwrap();
        wait_for(|| publisher.peer_count() == 1);
        assert!(start.elapsed() < Duration::from_secs(1));
        drop(silent);
    }

    #[test]
    fn test_full_inbox_drops_new_messages() {
        let options = TcpOptions {
            receive_queue_len: 2,
            ..TcpOptions::default()
        };
        let subscriber = TcpSubscriber::bind(&loopback(), options.clone()).unwrap();
        let endpoint = Endpoint::from(subscriber.local_addr());

        let mut controller = PeerConnection::connect(&endpoint, Protocol::Pub, &options).unwrap();
        for i in 0..5 {
            controller.send(format!("m{}", i).as_bytes()).unwrap();
        }
        wait_for(|| subscriber.messages_dropped() == 3);

        let mut buf = [0u8; 16];
        for expected in [b"m0", b"m1"] {
            let len = subscriber.recv(&mut buf, &RecvOptions::default()).unwrap();
            assert_eq!(&buf[..len], expected);
        }
        let options = RecvOptions::default().with_timeout(Duration::from_millis(50));
        assert!(matches!(
            subscriber.recv(&mut buf, &options),
            Err(NetworkError::Timeout)
        ));
    }

    #[test]
    fn test_bind_conflict_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::from(taken.local_addr().unwrap());

        let err = TcpPublisher::bind(&endpoint, TcpOptions::default()).err().unwrap();
        assert!(matches!(err, NetworkError::BindFailed { .. }), "{err}");
    }

    #[test]
    fn test_closed_sockets_refuse_io() {
        let publisher = TcpPublisher::bind(&loopback(), TcpOptions::default()).unwrap();
        publisher.close();
        assert!(matches!(publisher.send(b"x"), Err(NetworkError::Closed)));

        let subscriber = TcpSubscriber::bind(&loopback(), TcpOptions::default()).unwrap();
        subscriber.close();
        let err = subscriber
            .recv(&mut [0u8; 8], &RecvOptions::default())
            .unwrap_err();
        assert!(matches!(err, NetworkError::Closed));
    }
}
