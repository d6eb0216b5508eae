//! Network subsystem for pub/sub transport

pub mod endpoint;
pub mod manager;
pub mod tcp;
pub mod transport;
pub mod wire;

pub use endpoint::Endpoint;
pub use manager::SocketManager;
pub use tcp::{PeerConnection, TcpOptions, TcpTransport};
pub use transport::{CancelToken, PublishSocket, RecvOptions, SocketId, SubscribeSocket, Transport};
