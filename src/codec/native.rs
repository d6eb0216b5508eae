//! Pure-Rust media library
//!
//! Provides the `mjpeg` raw muxer (packets are written back to back with no
//! container header or trailer) and a baseline JPEG encoder built on the
//! `image` crate. Planar YUV input is converted to RGB before compression.

use bytes::{Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::codec::library::{
    CodecId, EncoderInfo, MediaLibrary, OutputFormat, Packet, Received, StreamParams,
};
use crate::constants::JPEG_QUALITY;
use crate::error::CodecError;
use crate::video::{Frame, PixelFormat};

/// Largest dimension a baseline JPEG can describe
const MAX_JPEG_DIMENSION: u32 = u16::MAX as u32;

static OUTPUT_FORMATS: [OutputFormat; 1] = [OutputFormat {
    name: "mjpeg",
    video_codec: CodecId::Mjpeg,
}];

static ENCODERS: [EncoderInfo; 1] = [EncoderInfo {
    name: "mjpeg",
    id: CodecId::Mjpeg,
    pixel_formats: &[
        PixelFormat::Yuvj420p,
        PixelFormat::Yuvj422p,
        PixelFormat::Yuvj444p,
        PixelFormat::Yuv420p,
        PixelFormat::Yuv422p,
        PixelFormat::Yuv444p,
        PixelFormat::Gray8,
        PixelFormat::Rgb24,
    ],
}];

/// Output context of the native library
#[derive(Debug, Default)]
pub struct NativeFormat {
    oformat: Option<&'static OutputFormat>,
    streams: Vec<StreamParams>,
    sink: Option<BytesMut>,
    header_written: bool,
    trailer_written: bool,
}

impl NativeFormat {
    pub fn output_format(&self) -> Option<&'static OutputFormat> {
        self.oformat
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    fn sink_mut(&mut self) -> Result<&mut BytesMut, CodecError> {
        self.sink
            .as_mut()
            .ok_or_else(|| CodecError::MuxingFailed("no output sink attached".into()))
    }
}

/// Opened encoder context of the native library
#[derive(Debug)]
pub struct NativeCodec {
    params: StreamParams,
    stream_index: usize,
    quality: u8,
    pending: Option<Packet>,
    open: bool,
}

/// Default media library
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLibrary;

impl NativeLibrary {
    pub fn new() -> Self {
        Self
    }
}

impl MediaLibrary for NativeLibrary {
    type Format = NativeFormat;
    type Codec = NativeCodec;

    fn alloc_output_context(&self) -> Result<NativeFormat, CodecError> {
        Ok(NativeFormat::default())
    }

    fn guess_output_format(&self, ctx: &mut NativeFormat, name: &str) -> Result<(), CodecError> {
        let format = OUTPUT_FORMATS
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| CodecError::FormatNotFound(name.to_string()))?;
        ctx.oformat = Some(format);
        Ok(())
    }

    fn new_stream(&self, ctx: &mut NativeFormat, params: StreamParams) -> Result<usize, CodecError> {
        let oformat = ctx
            .oformat
            .ok_or_else(|| CodecError::Allocation("no output format selected".into()))?;
        if params.codec_id != oformat.video_codec {
            return Err(CodecError::InvalidParameters(format!(
                "{} cannot carry {} streams",
                oformat.name, params.codec_id
            )));
        }
        ctx.streams.push(params);
        Ok(ctx.streams.len() - 1)
    }

    fn find_encoder(&self, id: CodecId) -> Option<&'static EncoderInfo> {
        ENCODERS.iter().find(|e| e.id == id)
    }

    fn open_codec(
        &self,
        encoder: &'static EncoderInfo,
        ctx: &NativeFormat,
        stream_index: usize,
    ) -> Result<NativeCodec, CodecError> {
        let params = ctx.streams.get(stream_index).cloned().ok_or_else(|| {
            CodecError::InvalidParameters(format!("no stream at index {}", stream_index))
        })?;

        if params.codec_id != encoder.id {
            return Err(CodecError::InvalidParameters(format!(
                "encoder {} cannot encode {}",
                encoder.name, params.codec_id
            )));
        }
        if params.width == 0 || params.height == 0 {
            return Err(CodecError::InvalidParameters(format!(
                "dimensions must be positive, got {}x{}",
                params.width, params.height
            )));
        }
        if params.width > MAX_JPEG_DIMENSION || params.height > MAX_JPEG_DIMENSION {
            return Err(CodecError::InvalidParameters(format!(
                "dimensions {}x{} exceed the JPEG limit",
                params.width, params.height
            )));
        }
        if !params.time_base.is_valid() {
            return Err(CodecError::InvalidParameters(format!(
                "invalid time base {}",
                params.time_base
            )));
        }
        if !encoder.supports(params.pixel_format) {
            return Err(CodecError::UnsupportedPixelFormat(
                params.pixel_format.to_string(),
            ));
        }

        Ok(NativeCodec {
            params,
            stream_index,
            quality: JPEG_QUALITY,
            pending: None,
            open: true,
        })
    }

    fn open_dyn_buf(&self, ctx: &mut NativeFormat) -> Result<(), CodecError> {
        if ctx.sink.is_some() {
            return Err(CodecError::Allocation("output sink already attached".into()));
        }
        ctx.sink = Some(BytesMut::new());
        Ok(())
    }

    fn write_header(&self, ctx: &mut NativeFormat) -> Result<(), CodecError> {
        if ctx.oformat.is_none() || ctx.streams.is_empty() {
            return Err(CodecError::MuxingFailed(
                "header requires an output format and at least one stream".into(),
            ));
        }
        // Raw MJPEG has no container header; the sink just has to exist
        ctx.sink_mut()?;
        ctx.header_written = true;
        Ok(())
    }

    fn send_frame(&self, codec: &mut NativeCodec, frame: &Frame) -> Result<(), CodecError> {
        if !codec.open {
            return Err(CodecError::EncodingFailed("encoder is closed".into()));
        }
        if codec.pending.is_some() {
            return Err(CodecError::EncodingFailed(
                "previous packet has not been received".into(),
            ));
        }
        let params = &codec.params;
        if frame.width() != params.width || frame.height() != params.height {
            return Err(CodecError::InvalidFrame(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                params.width,
                params.height
            )));
        }
        if frame.format() != params.pixel_format {
            return Err(CodecError::InvalidFrame(format!(
                "frame is {}, encoder expects {}",
                frame.format(),
                params.pixel_format
            )));
        }
        frame.validate()?;

        let (pixels, color) = raster(frame);
        let mut data = Vec::new();
        JpegEncoder::new_with_quality(&mut data, codec.quality)
            .encode(&pixels, frame.width(), frame.height(), color)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        codec.pending = Some(Packet {
            data: Bytes::from(data),
            stream_index: codec.stream_index,
            pts: frame.pts(),
        });
        Ok(())
    }

    fn receive_packet(&self, codec: &mut NativeCodec) -> Result<Received, CodecError> {
        if !codec.open {
            return Ok(Received::Eof);
        }
        Ok(match codec.pending.take() {
            Some(packet) => Received::Packet(packet),
            None => Received::Again,
        })
    }

    fn write_packet(&self, ctx: &mut NativeFormat, packet: Packet) -> Result<(), CodecError> {
        if !ctx.header_written || ctx.trailer_written {
            return Err(CodecError::MuxingFailed(
                "packet written outside header/trailer".into(),
            ));
        }
        if packet.stream_index >= ctx.streams.len() {
            return Err(CodecError::MuxingFailed(format!(
                "packet for unknown stream {}",
                packet.stream_index
            )));
        }
        ctx.sink_mut()?.extend_from_slice(&packet.data);
        Ok(())
    }

    fn write_trailer(&self, ctx: &mut NativeFormat) -> Result<(), CodecError> {
        if !ctx.header_written {
            return Err(CodecError::MuxingFailed("trailer written before header".into()));
        }
        ctx.sink_mut()?;
        ctx.trailer_written = true;
        Ok(())
    }

    fn close_dyn_buf(&self, ctx: &mut NativeFormat) -> Result<Bytes, CodecError> {
        ctx.sink
            .take()
            .map(BytesMut::freeze)
            .ok_or_else(|| CodecError::MuxingFailed("no output sink attached".into()))
    }

    fn free_codec_context(&self, codec: &mut NativeCodec) {
        codec.pending = None;
        codec.open = false;
    }

    fn free_output_context(&self, ctx: &mut NativeFormat) {
        ctx.sink = None;
        ctx.streams.clear();
        ctx.oformat = None;
    }
}

/// Pack a frame into a tightly laid out raster the JPEG encoder accepts
fn raster(frame: &Frame) -> (Vec<u8>, ExtendedColorType) {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let planes = frame.planes();

    match frame.format() {
        PixelFormat::Gray8 => {
            let mut out = Vec::with_capacity(width * height);
            for y in 0..height {
                out.extend_from_slice(planes[0].row(y, width));
            }
            (out, ExtendedColorType::L8)
        }
        PixelFormat::Rgb24 => {
            let mut out = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                out.extend_from_slice(planes[0].row(y, width * 3));
            }
            (out, ExtendedColorType::Rgb8)
        }
        format => {
            let (sx, sy) = format.chroma_shift();
            let full_range = format.is_full_range();
            let mut out = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                let luma = &planes[0].data[y * planes[0].stride..];
                let cy = y >> sy;
                let cb = &planes[1].data[cy * planes[1].stride..];
                let cr = &planes[2].data[cy * planes[2].stride..];
                for x in 0..width {
                    let cx = x >> sx;
                    out.extend_from_slice(&yuv_to_rgb(luma[x], cb[cx], cr[cx], full_range));
                }
            }
            (out, ExtendedColorType::Rgb8)
        }
    }
}

/// BT.601 YCbCr to RGB
fn yuv_to_rgb(y: u8, u: u8, v: u8, full_range: bool) -> [u8; 3] {
    let (y, u, v) = (y as f32, u as f32 - 128.0, v as f32 - 128.0);
    let (r, g, b) = if full_range {
        (
            y + 1.402 * v,
            y - 0.344_136 * u - 0.714_136 * v,
            y + 1.772 * u,
        )
    } else {
        let y = 1.164 * (y - 16.0);
        (
            y + 1.596 * v,
            y - 0.392 * u - 0.813 * v,
            y + 2.017 * u,
        )
    };
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::library::Rational;

    fn params(width: u32, height: u32, format: PixelFormat) -> StreamParams {
        StreamParams {
            codec_id: CodecId::Mjpeg,
            pixel_format: format,
            width,
            height,
            time_base: Rational::new(1, 25),
        }
    }

    #[test]
    fn test_unknown_output_format() {
        let lib = NativeLibrary::new();
        let mut ctx = lib.alloc_output_context().unwrap();
        let err = lib.guess_output_format(&mut ctx, "matroska").unwrap_err();
        assert!(matches!(err, CodecError::FormatNotFound(name) if name == "matroska"));
        assert!(ctx.output_format().is_none());
    }

    #[test]
    fn test_stream_requires_output_format() {
        let lib = NativeLibrary::new();
        let mut ctx = lib.alloc_output_context().unwrap();
        assert!(lib
            .new_stream(&mut ctx, params(8, 8, PixelFormat::Yuv420p))
            .is_err());
    }

    #[test]
    fn test_open_codec_rejects_zero_width() {
        let lib = NativeLibrary::new();
        let mut ctx = lib.alloc_output_context().unwrap();
        lib.guess_output_format(&mut ctx, "mjpeg").unwrap();
        let index = lib
            .new_stream(&mut ctx, params(0, 16, PixelFormat::Yuv420p))
            .unwrap();
        let encoder = lib.find_encoder(CodecId::Mjpeg).unwrap();
        let err = lib.open_codec(encoder, &ctx, index).unwrap_err();
        assert!(matches!(err, CodecError::InvalidParameters(_)));
    }

    #[test]
    fn test_receive_before_send_is_again() {
        let lib = NativeLibrary::new();
        let mut ctx = lib.alloc_output_context().unwrap();
        lib.guess_output_format(&mut ctx, "mjpeg").unwrap();
        let index = lib
            .new_stream(&mut ctx, params(8, 8, PixelFormat::Gray8))
            .unwrap();
        let encoder = lib.find_encoder(CodecId::Mjpeg).unwrap();
        let mut codec = lib.open_codec(encoder, &ctx, index).unwrap();
        assert!(matches!(lib.receive_packet(&mut codec), Ok(Received::Again)));

        lib.free_codec_context(&mut codec);
        assert!(matches!(lib.receive_packet(&mut codec), Ok(Received::Eof)));
    }

    #[test]
    fn test_send_rejects_mismatched_frame() {
        let lib = NativeLibrary::new();
        let mut ctx = lib.alloc_output_context().unwrap();
        lib.guess_output_format(&mut ctx, "mjpeg").unwrap();
        let index = lib
            .new_stream(&mut ctx, params(8, 8, PixelFormat::Yuv420p))
            .unwrap();
        let encoder = lib.find_encoder(CodecId::Mjpeg).unwrap();
        let mut codec = lib.open_codec(encoder, &ctx, index).unwrap();

        let frame = Frame::alloc(16, 8, PixelFormat::Yuv420p);
        assert!(matches!(
            lib.send_frame(&mut codec, &frame),
            Err(CodecError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_free_closes_sink() {
        let lib = NativeLibrary::new();
        let mut ctx = lib.alloc_output_context().unwrap();
        lib.open_dyn_buf(&mut ctx).unwrap();
        assert!(ctx.has_sink());
        lib.free_output_context(&mut ctx);
        assert!(!ctx.has_sink());
    }

    #[test]
    fn test_yuv_conversion() {
        // Full-range grey stays grey
        assert_eq!(yuv_to_rgb(128, 128, 128, true), [128, 128, 128]);
        // Limited-range black and white map to the ends of the RGB span
        assert_eq!(yuv_to_rgb(16, 128, 128, false), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128, false), [255, 255, 255]);
    }
}
