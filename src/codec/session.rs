//! Single-use encode session
//!
//! `EncodeSession` owns every resource acquired while compressing one frame:
//! the output context (and the sink attached to it) and the codec context.
//! Dropping the session releases whatever has been acquired so far, codec
//! first, so early returns with `?` never leak.

use bytes::Bytes;
use tracing::trace;

use crate::codec::library::{
    CodecId, EncoderInfo, MediaLibrary, Packet, Received, StreamParams,
};
use crate::constants::STREAM_TIME_BASE;
use crate::error::CodecError;
use crate::video::Frame;

pub(crate) struct EncodeSession<'l, L: MediaLibrary> {
    library: &'l L,
    format: L::Format,
    codec: Option<L::Codec>,
    stream_index: Option<usize>,
}

impl<'l, L: MediaLibrary> EncodeSession<'l, L> {
    /// Allocate the output context
    pub(crate) fn new(library: &'l L) -> Result<Self, CodecError> {
        let format = library.alloc_output_context()?;
        Ok(Self {
            library,
            format,
            codec: None,
            stream_index: None,
        })
    }

    pub(crate) fn select_format(&mut self, name: &str) -> Result<(), CodecError> {
        self.library.guess_output_format(&mut self.format, name)
    }

    /// Add the single video stream, shaped after `frame`.
    ///
    /// The time base is fixed and never taken from the input.
    pub(crate) fn add_video_stream(
        &mut self,
        codec_id: CodecId,
        frame: &Frame,
    ) -> Result<usize, CodecError> {
        let params = StreamParams {
            codec_id,
            pixel_format: frame.format(),
            width: frame.width(),
            height: frame.height(),
            time_base: STREAM_TIME_BASE,
        };
        let index = self.library.new_stream(&mut self.format, params)?;
        self.stream_index = Some(index);
        Ok(index)
    }

    pub(crate) fn open_codec(&mut self, encoder: &'static EncoderInfo) -> Result<(), CodecError> {
        let index = self
            .stream_index
            .ok_or_else(|| CodecError::Allocation("codec opened before stream".into()))?;
        let codec = self.library.open_codec(encoder, &self.format, index)?;
        self.codec = Some(codec);
        Ok(())
    }

    pub(crate) fn open_sink(&mut self) -> Result<(), CodecError> {
        self.library.open_dyn_buf(&mut self.format)
    }

    pub(crate) fn write_header(&mut self) -> Result<(), CodecError> {
        self.library.write_header(&mut self.format)
    }

    pub(crate) fn send_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let library = self.library;
        library.send_frame(self.codec_mut()?, frame)
    }

    /// Receive at most one packet. "Again" and end-of-stream both mean no
    /// packet for a single still frame and are not errors.
    pub(crate) fn receive_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        let library = self.library;
        match library.receive_packet(self.codec_mut()?)? {
            Received::Packet(packet) => Ok(Some(packet)),
            Received::Again | Received::Eof => {
                trace!("encoder produced no packet");
                Ok(None)
            }
        }
    }

    pub(crate) fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        self.library.write_packet(&mut self.format, packet)
    }

    pub(crate) fn write_trailer(&mut self) -> Result<(), CodecError> {
        self.library.write_trailer(&mut self.format)
    }

    pub(crate) fn close_sink(&mut self) -> Result<Bytes, CodecError> {
        self.library.close_dyn_buf(&mut self.format)
    }

    fn codec_mut(&mut self) -> Result<&mut L::Codec, CodecError> {
        self.codec
            .as_mut()
            .ok_or_else(|| CodecError::EncodingFailed("codec is not open".into()))
    }
}

impl<L: MediaLibrary> Drop for EncodeSession<'_, L> {
    fn drop(&mut self) {
        if let Some(codec) = self.codec.as_mut() {
            self.library.free_codec_context(codec);
        }
        self.library.free_output_context(&mut self.format);
    }
}
