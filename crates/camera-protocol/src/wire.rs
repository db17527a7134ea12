//! Wire encoding for camera protocol payloads
//!
//! Every multi-byte field is little-endian. Layouts are encoded field by
//! field; no struct is ever reinterpreted as bytes.
//!
//! ```text
//! CONFIGURE_STREAMS request   num_streams(2) | config(8) * n
//!   config                    width(2) height(2) format(2) reserved(2)
//! CONFIGURE_STREAMS response  num_streams(2) flags(2) | answer(12) * n
//!   answer                    width(2) height(2) format(2) vc(1) dt(1) max_size(4)
//! CAPTURE request             request_id(4) streams(1) reserved(1) num_frames(2) | settings
//! FLUSH response              request_id(4)
//! META_DATA request           request_id(4) frame_number(2) stream(1) reserved(1)
//! META_DATA response          request_id(4) frame_number(2) stream(1) reserved(1) | data
//! ```

use bytes::{Buf, BufMut};
use camera_device::{
    CaptureRequest, ConfigFlags, MetadataQuery, MetadataRecord, PixelFormat, StreamConfigAnswer,
    StreamConfigRequest,
};
use thiserror::Error;

/// Wire decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Payload shorter than the layout requires
    #[error("{what} needs {needed} bytes, got {got}")]
    Short {
        what: &'static str,
        needed: usize,
        got: usize,
    },
}

/// A payload with an explicit little-endian layout
pub trait WireFormat: Sized {
    /// Fixed part of the layout, checked before any field is read
    const HEADER_SIZE: usize;

    /// Human readable name used in errors
    const NAME: &'static str;

    fn encoded_len(&self) -> usize;

    fn encode<B: BufMut>(&self, buf: &mut B);

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError>;
}

fn ensure<B: Buf>(buf: &B, what: &'static str, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Short {
            what,
            needed,
            got: buf.remaining(),
        });
    }
    Ok(())
}

/// Encode into a fresh vector. Host-side helper; the session reserves its
/// response buffers itself.
pub fn to_vec<T: WireFormat>(msg: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut out);
    out
}

/// Decode a complete payload
pub fn from_slice<T: WireFormat>(mut payload: &[u8]) -> Result<T, WireError> {
    T::decode(&mut payload)
}

/// PROTOCOL_VERSION response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionResponse {
    pub major: u8,
    pub minor: u8,
}

impl WireFormat for VersionResponse {
    const HEADER_SIZE: usize = 2;
    const NAME: &'static str = "version response";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        Ok(Self {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        })
    }
}

/// CAPABILITIES response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<u8>,
}

impl WireFormat for CapabilitiesResponse {
    const HEADER_SIZE: usize = 2;
    const NAME: &'static str = "capabilities response";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.capabilities.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.capabilities.len() as u16);
        buf.put_slice(&self.capabilities);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        let size = buf.get_u16_le() as usize;
        ensure(buf, Self::NAME, size)?;
        let mut capabilities = vec![0; size];
        buf.copy_to_slice(&mut capabilities);
        Ok(Self { capabilities })
    }
}

impl WireFormat for StreamConfigRequest {
    const HEADER_SIZE: usize = StreamConfigRequest::WIRE_SIZE;
    const NAME: &'static str = "stream config";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u16_le(self.format.code());
        buf.put_u16_le(self.reserved);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        Ok(Self {
            width: buf.get_u16_le(),
            height: buf.get_u16_le(),
            format: PixelFormat::from(buf.get_u16_le()),
            reserved: buf.get_u16_le(),
        })
    }
}

impl WireFormat for StreamConfigAnswer {
    const HEADER_SIZE: usize = StreamConfigAnswer::WIRE_SIZE;
    const NAME: &'static str = "stream config answer";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u16_le(self.format.code());
        buf.put_u8(self.virtual_channel);
        buf.put_u8(self.data_type);
        buf.put_u32_le(self.max_size);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        Ok(Self {
            width: buf.get_u16_le(),
            height: buf.get_u16_le(),
            format: PixelFormat::from(buf.get_u16_le()),
            virtual_channel: buf.get_u8(),
            data_type: buf.get_u8(),
            max_size: buf.get_u32_le(),
        })
    }
}

/// CONFIGURE_STREAMS request. An empty stream list is a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureStreamsRequest {
    pub streams: Vec<StreamConfigRequest>,
}

impl WireFormat for ConfigureStreamsRequest {
    const HEADER_SIZE: usize = 2;
    const NAME: &'static str = "configure streams request";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.streams.len() * StreamConfigRequest::WIRE_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.streams.len() as u16);
        for stream in &self.streams {
            stream.encode(buf);
        }
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        let num_streams = buf.get_u16_le() as usize;
        ensure(
            buf,
            Self::NAME,
            num_streams * StreamConfigRequest::WIRE_SIZE,
        )?;
        let streams = (0..num_streams)
            .map(|_| StreamConfigRequest::decode(buf))
            .collect::<Result<_, _>>()?;
        Ok(Self { streams })
    }
}

/// CONFIGURE_STREAMS response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureStreamsResponse {
    pub flags: ConfigFlags,
    pub streams: Vec<StreamConfigAnswer>,
}

impl ConfigureStreamsResponse {
    /// Encoded length for `num_streams` answers
    pub fn len_for(num_streams: usize) -> usize {
        Self::HEADER_SIZE + num_streams * StreamConfigAnswer::WIRE_SIZE
    }
}

impl WireFormat for ConfigureStreamsResponse {
    const HEADER_SIZE: usize = 4;
    const NAME: &'static str = "configure streams response";

    fn encoded_len(&self) -> usize {
        Self::len_for(self.streams.len())
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.streams.len() as u16);
        buf.put_u16_le(self.flags.bits());
        for stream in &self.streams {
            stream.encode(buf);
        }
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        let num_streams = buf.get_u16_le() as usize;
        let flags = ConfigFlags::from_bits(buf.get_u16_le());
        ensure(buf, Self::NAME, num_streams * StreamConfigAnswer::WIRE_SIZE)?;
        let streams = (0..num_streams)
            .map(|_| StreamConfigAnswer::decode(buf))
            .collect::<Result<_, _>>()?;
        Ok(Self { flags, streams })
    }
}

/// CAPTURE request. The reserved byte is ignored on decode and sent as zero.
impl WireFormat for CaptureRequest {
    const HEADER_SIZE: usize = 8;
    const NAME: &'static str = "capture request";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.settings.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.request_id);
        buf.put_u8(self.stream_mask);
        buf.put_u8(0);
        buf.put_u16_le(self.frame_count);
        buf.put_slice(&self.settings);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        let request_id = buf.get_u32_le();
        let stream_mask = buf.get_u8();
        let _reserved = buf.get_u8();
        let frame_count = buf.get_u16_le();
        let mut settings = vec![0; buf.remaining()];
        buf.copy_to_slice(&mut settings);
        Ok(Self {
            request_id,
            stream_mask,
            frame_count,
            settings,
        })
    }
}

/// FLUSH response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResponse {
    /// Request the camera was working on when stopped
    pub request_id: u32,
}

impl WireFormat for FlushResponse {
    const HEADER_SIZE: usize = 4;
    const NAME: &'static str = "flush response";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.request_id);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        Ok(Self {
            request_id: buf.get_u32_le(),
        })
    }
}

impl WireFormat for MetadataQuery {
    const HEADER_SIZE: usize = 8;
    const NAME: &'static str = "meta data request";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.request_id);
        buf.put_u16_le(self.frame_number);
        buf.put_u8(self.stream_index);
        buf.put_u8(0);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        let request_id = buf.get_u32_le();
        let frame_number = buf.get_u16_le();
        let stream_index = buf.get_u8();
        let _reserved = buf.get_u8();
        Ok(Self {
            request_id,
            frame_number,
            stream_index,
        })
    }
}

impl WireFormat for MetadataRecord {
    const HEADER_SIZE: usize = 8;
    const NAME: &'static str = "meta data response";

    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.request_id);
        buf.put_u16_le(self.frame_number);
        buf.put_u8(self.stream_index);
        buf.put_u8(0);
        buf.put_slice(&self.data);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, Self::HEADER_SIZE)?;
        let request_id = buf.get_u32_le();
        let frame_number = buf.get_u16_le();
        let stream_index = buf.get_u8();
        let _reserved = buf.get_u8();
        let mut data = vec![0; buf.remaining()];
        buf.copy_to_slice(&mut data);
        Ok(Self {
            request_id,
            frame_number,
            stream_index,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_device::ImageSize;
    use proptest::prelude::*;

    #[test]
    fn test_answer_layout_is_little_endian() {
        let answer = StreamConfigAnswer {
            width: 0x0280,
            height: 0x01E0,
            format: PixelFormat::YCbCr422,
            virtual_channel: 2,
            data_type: 0x1E,
            max_size: 0x0009_6000,
        };
        assert_eq!(
            to_vec(&answer),
            vec![0x80, 0x02, 0xE0, 0x01, 0x07, 0x00, 0x02, 0x1E, 0x00, 0x60, 0x09, 0x00]
        );
    }

    #[test]
    fn test_configure_request_short_payload() {
        // claims two streams, carries one
        let mut payload = vec![0x02, 0x00];
        payload.extend(to_vec(&StreamConfigRequest::new(
            ImageSize::VGA,
            PixelFormat::YCbCr422,
        )));

        let err = from_slice::<ConfigureStreamsRequest>(&payload).unwrap_err();
        assert_eq!(
            err,
            WireError::Short {
                what: "configure streams request",
                needed: 16,
                got: 8
            }
        );
    }

    #[test]
    fn test_capture_settings_trail_header() {
        let payload = [0x05, 0, 0, 0, 0x03, 0xAA, 0x10, 0x00, 0xDE, 0xAD];
        let request: CaptureRequest = from_slice(&payload).unwrap();
        assert_eq!(request.request_id, 5);
        assert_eq!(request.stream_mask, 0x03);
        assert_eq!(request.frame_count, 16);
        assert_eq!(request.settings, vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_metadata_request_short() {
        assert!(from_slice::<MetadataQuery>(&[1, 0, 0, 0, 2]).is_err());
    }

    proptest! {
        #[test]
        fn prop_stream_answer_round_trip(
            width in any::<u16>(),
            height in any::<u16>(),
            format in any::<u16>(),
            virtual_channel in any::<u8>(),
            data_type in any::<u8>(),
            max_size in any::<u32>(),
        ) {
            let answer = StreamConfigAnswer {
                width,
                height,
                format: PixelFormat::from(format),
                virtual_channel,
                data_type,
                max_size,
            };
            let encoded = to_vec(&answer);
            prop_assert_eq!(encoded.len(), StreamConfigAnswer::WIRE_SIZE);
            let decoded: StreamConfigAnswer = from_slice(&encoded).unwrap();
            prop_assert_eq!(decoded, answer);
        }
    }
}
