use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub const RTP_VERSION: u8 = 2;
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// RTP fixed header (RFC 3550 §5.1), grounded on
/// `rvoip-rtp-core::packet::RtpHeader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        RtpHeader {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        RTP_MIN_HEADER_SIZE + self.csrc.len() * 4
    }

    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }
        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!("unsupported version {version}")));
        }
        let padding = (first >> 5) & 1 != 0;
        let extension = (first >> 4) & 1 != 0;
        let cc = first & 0x0F;

        let second = buf.get_u8();
        let marker = (second >> 7) != 0;
        let payload_type = second & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc as usize * 4 {
            return Err(Error::BufferTooSmall {
                required: cc as usize * 4,
                available: buf.remaining(),
            });
        }
        let mut csrc = Vec::with_capacity(cc as usize);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        if extension {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }
            let _ext_id = buf.get_u16();
            let ext_words = buf.get_u16() as usize;
            let ext_len = ext_words * 4;
            if buf.remaining() < ext_len {
                return Err(Error::BufferTooSmall {
                    required: ext_len,
                    available: buf.remaining(),
                });
            }
            buf.advance(ext_len);
        }

        // Header extensions are consumed but not retained: this core has no
        // extension payload to round-trip, so the flag is normalized off.
        Ok(RtpHeader {
            version,
            padding,
            extension: false,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        let mut first = (self.version & 0x03) << 6;
        if self.padding {
            first |= 1 << 5;
        }
        if self.extension {
            first |= 1 << 4;
        }
        first |= self.csrc.len() as u8 & 0x0F;
        buf.put_u8(first);

        let mut second = 0u8;
        if self.marker {
            second |= 1 << 7;
        }
        second |= self.payload_type & 0x7F;
        buf.put_u8(second);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for c in &self.csrc {
            buf.put_u32(*c);
        }
    }
}

/// An RTP packet: fixed header plus opaque payload bytes. Payload
/// interpretation (codec framing) belongs to the media plane, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        RtpPacket { header, payload }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        let header = RtpHeader::parse(&mut buf)?;
        Ok(RtpPacket { header, payload: buf })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.size() + self.payload.len());
        self.header.serialize(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = RtpHeader::new(0, 1000, 160_000, 0xDEADBEEF);
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        let mut reader = buf.freeze();
        let parsed = RtpHeader::parse(&mut reader).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn packet_round_trips_with_payload() {
        let header = RtpHeader::new(8, 42, 320, 1);
        let packet = RtpPacket::new(header.clone(), Bytes::from_static(b"payload"));
        let wire = packet.serialize();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.payload.as_ref(), b"payload");
    }

    #[test]
    fn rejects_short_buffer() {
        let err = RtpHeader::parse(&mut Bytes::from_static(&[0u8; 4])).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { .. }));
    }
}
