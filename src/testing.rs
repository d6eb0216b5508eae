//! Test doubles for the media library and the transport

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::codec::library::{
    CodecId, EncoderInfo, MediaLibrary, Packet, Received, StreamParams,
};
use crate::codec::native::{NativeCodec, NativeFormat, NativeLibrary};
use crate::error::{CodecError, NetworkError};
use crate::network::endpoint::Endpoint;
use crate::network::transport::{
    recv_into, PublishSocket, RecvOptions, SocketId, SubscribeSocket, Transport,
};
use crate::video::Frame;

/// Encode protocol steps at which `CountingLibrary` can inject a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    AllocContext,
    GuessFormat,
    NewStream,
    FindEncoder,
    OpenCodec,
    OpenSink,
    WriteHeader,
    SendFrame,
    ReceivePacket,
    WritePacket,
    WriteTrailer,
    CloseSink,
}

impl Step {
    pub(crate) const ALL: [Step; 12] = [
        Step::AllocContext,
        Step::GuessFormat,
        Step::NewStream,
        Step::FindEncoder,
        Step::OpenCodec,
        Step::OpenSink,
        Step::WriteHeader,
        Step::SendFrame,
        Step::ReceivePacket,
        Step::WritePacket,
        Step::WriteTrailer,
        Step::CloseSink,
    ];

    fn injected_error(self) -> CodecError {
        let what = format!("injected failure at {:?}", self);
        match self {
            Step::GuessFormat => CodecError::FormatNotFound(what),
            Step::FindEncoder => CodecError::EncoderNotFound(what),
            Step::SendFrame | Step::ReceivePacket => CodecError::EncodingFailed(what),
            Step::WriteHeader | Step::WritePacket | Step::WriteTrailer | Step::CloseSink => {
                CodecError::MuxingFailed(what)
            }
            _ => CodecError::Allocation(what),
        }
    }
}

/// Acquisition and release counters
#[derive(Debug, Clone, Default)]
pub(crate) struct Counts {
    pub formats_allocated: usize,
    pub formats_freed: usize,
    pub codecs_opened: usize,
    pub codecs_freed: usize,
    pub sinks_opened: usize,
    pub sinks_closed: usize,
    pub packets_written: usize,
}

/// `NativeLibrary` wrapper that counts resources and injects failures
pub(crate) struct CountingLibrary {
    inner: NativeLibrary,
    fail_at: Option<Step>,
    withhold_packets: bool,
    counts: Mutex<Counts>,
    streams: Mutex<Vec<StreamParams>>,
}

impl CountingLibrary {
    pub(crate) fn new() -> Self {
        Self {
            inner: NativeLibrary::new(),
            fail_at: None,
            withhold_packets: false,
            counts: Mutex::new(Counts::default()),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_at(step: Step) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::new()
        }
    }

    /// Encoder that never hands out a packet
    pub(crate) fn withholding_packets() -> Self {
        Self {
            withhold_packets: true,
            ..Self::new()
        }
    }

    pub(crate) fn counts(&self) -> Counts {
        self.counts.lock().clone()
    }

    pub(crate) fn streams(&self) -> Vec<StreamParams> {
        self.streams.lock().clone()
    }

    fn check(&self, step: Step) -> Result<(), CodecError> {
        if self.fail_at == Some(step) {
            Err(step.injected_error())
        } else {
            Ok(())
        }
    }
}

impl MediaLibrary for CountingLibrary {
    type Format = NativeFormat;
    type Codec = NativeCodec;

    fn alloc_output_context(&self) -> Result<NativeFormat, CodecError> {
        self.check(Step::AllocContext)?;
        let ctx = self.inner.alloc_output_context()?;
        self.counts.lock().formats_allocated += 1;
        Ok(ctx)
    }

    fn guess_output_format(&self, ctx: &mut NativeFormat, name: &str) -> Result<(), CodecError> {
        self.check(Step::GuessFormat)?;
        self.inner.guess_output_format(ctx, name)
    }

    fn new_stream(&self, ctx: &mut NativeFormat, params: StreamParams) -> Result<usize, CodecError> {
        self.check(Step::NewStream)?;
        let index = self.inner.new_stream(ctx, params.clone())?;
        self.streams.lock().push(params);
        Ok(index)
    }

    fn find_encoder(&self, id: CodecId) -> Option<&'static EncoderInfo> {
        if self.fail_at == Some(Step::FindEncoder) {
            return None;
        }
        self.inner.find_encoder(id)
    }

    fn open_codec(
        &self,
        encoder: &'static EncoderInfo,
        ctx: &NativeFormat,
        stream_index: usize,
    ) -> Result<NativeCodec, CodecError> {
        self.check(Step::OpenCodec)?;
        let codec = self.inner.open_codec(encoder, ctx, stream_index)?;
        self.counts.lock().codecs_opened += 1;
        Ok(codec)
    }

    fn open_dyn_buf(&self, ctx: &mut NativeFormat) -> Result<(), CodecError> {
        self.check(Step::OpenSink)?;
        self.inner.open_dyn_buf(ctx)?;
        self.counts.lock().sinks_opened += 1;
        Ok(())
    }

    fn write_header(&self, ctx: &mut NativeFormat) -> Result<(), CodecError> {
        self.check(Step::WriteHeader)?;
        self.inner.write_header(ctx)
    }

    fn send_frame(&self, codec: &mut NativeCodec, frame: &Frame) -> Result<(), CodecError> {
        self.check(Step::SendFrame)?;
        self.inner.send_frame(codec, frame)
    }

    fn receive_packet(&self, codec: &mut NativeCodec) -> Result<Received, CodecError> {
        self.check(Step::ReceivePacket)?;
        let received = self.inner.receive_packet(codec)?;
        if self.withhold_packets {
            return Ok(Received::Again);
        }
        Ok(received)
    }

    fn write_packet(&self, ctx: &mut NativeFormat, packet: Packet) -> Result<(), CodecError> {
        self.check(Step::WritePacket)?;
        self.inner.write_packet(ctx, packet)?;
        self.counts.lock().packets_written += 1;
        Ok(())
    }

    fn write_trailer(&self, ctx: &mut NativeFormat) -> Result<(), CodecError> {
        self.check(Step::WriteTrailer)?;
        self.inner.write_trailer(ctx)
    }

    fn close_dyn_buf(&self, ctx: &mut NativeFormat) -> Result<Bytes, CodecError> {
        self.check(Step::CloseSink)?;
        let data = self.inner.close_dyn_buf(ctx)?;
        self.counts.lock().sinks_closed += 1;
        Ok(data)
    }

    fn free_codec_context(&self, codec: &mut NativeCodec) {
        self.inner.free_codec_context(codec);
        self.counts.lock().codecs_freed += 1;
    }

    fn free_output_context(&self, ctx: &mut NativeFormat) {
        let mut counts = self.counts.lock();
        if ctx.has_sink() {
            counts.sinks_closed += 1;
        }
        self.inner.free_output_context(ctx);
        counts.formats_freed += 1;
    }
}

/// In-memory transport recording binds and sends
pub(crate) struct MockTransport {
    publisher_binds: AtomicUsize,
    subscriber_binds: AtomicUsize,
    fail_next_bind: AtomicBool,
    fail_sends: Arc<AtomicBool>,
    send_attempts: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Bytes>>>,
    bound: Mutex<Vec<String>>,
    inbox_tx: Sender<Bytes>,
    inbox_rx: Receiver<Bytes>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            publisher_binds: AtomicUsize::new(0),
            subscriber_binds: AtomicUsize::new(0),
            fail_next_bind: AtomicBool::new(false),
            fail_sends: Arc::new(AtomicBool::new(false)),
            send_attempts: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            bound: Mutex::new(Vec::new()),
            inbox_tx,
            inbox_rx,
        }
    }

    pub(crate) fn fail_next_bind(&self) {
        self.fail_next_bind.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn publisher_binds(&self) -> usize {
        self.publisher_binds.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriber_binds(&self) -> usize {
        self.subscriber_binds.load(Ordering::SeqCst)
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn bound_endpoints(&self) -> Vec<String> {
        self.bound.lock().clone()
    }

    /// Queue a message for the subscriber side
    pub(crate) fn deliver(&self, payload: &[u8]) {
        let _ = self.inbox_tx.send(Bytes::copy_from_slice(payload));
    }

    fn bind(&self, endpoint: &Endpoint) -> Result<(), NetworkError> {
        if self.fail_next_bind.swap(false, Ordering::SeqCst) {
            return Err(NetworkError::BindFailed {
                endpoint: endpoint.to_string(),
                reason: "Address already in use".into(),
            });
        }
        self.bound.lock().push(endpoint.to_string());
        Ok(())
    }
}

impl Transport for MockTransport {
    type Publisher = MockPublisher;
    type Subscriber = MockSubscriber;

    fn bind_publisher(&self, endpoint: &Endpoint) -> Result<MockPublisher, NetworkError> {
        self.publisher_binds.fetch_add(1, Ordering::SeqCst);
        self.bind(endpoint)?;
        Ok(MockPublisher {
            id: SocketId::next(),
            closed: AtomicBool::new(false),
            fail_sends: self.fail_sends.clone(),
            send_attempts: self.send_attempts.clone(),
            sent: self.sent.clone(),
        })
    }

    fn bind_subscriber(&self, endpoint: &Endpoint) -> Result<MockSubscriber, NetworkError> {
        self.subscriber_binds.fetch_add(1, Ordering::SeqCst);
        self.bind(endpoint)?;
        Ok(MockSubscriber {
            id: SocketId::next(),
            closed: AtomicBool::new(false),
            inbox: self.inbox_rx.clone(),
        })
    }
}

pub(crate) struct MockPublisher {
    id: SocketId,
    closed: AtomicBool,
    fail_sends: Arc<AtomicBool>,
    send_attempts: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Bytes>>>,
}

impl MockPublisher {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PublishSocket for MockPublisher {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send(&self, payload: &[u8]) -> Result<usize, NetworkError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NetworkError::SendFailed("connection reset".into()));
        }
        self.sent.lock().push(Bytes::copy_from_slice(payload));
        Ok(payload.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct MockSubscriber {
    id: SocketId,
    closed: AtomicBool,
    inbox: Receiver<Bytes>,
}

impl SubscribeSocket for MockSubscriber {
    fn id(&self) -> SocketId {
        self.id
    }

    fn recv(&self, buf: &mut [u8], options: &RecvOptions) -> Result<usize, NetworkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }
        recv_into(&self.inbox, buf, options)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
