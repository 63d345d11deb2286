//! Box header framing: `u32 size | u32 type`, with the 64-bit extended form.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vttsource_common::{Error, Result};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    // WebVTT
    pub const VTCU: Self = Self(*b"vtcu");
    pub const VTTE: Self = Self(*b"vtte");
    pub const WVTT: Self = Self(*b"wvtt");
    pub const VTTC: Self = Self(*b"vttC");
    pub const IDEN: Self = Self(*b"iden");
    pub const STTG: Self = Self(*b"sttg");
    pub const PAYL: Self = Self(*b"payl");
    pub const CTIM: Self = Self(*b"ctim");

    // Movie structure
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const TRAK: Self = Self(*b"trak");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const DINF: Self = Self(*b"dinf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const MVEX: Self = Self(*b"mvex");
    pub const EDTS: Self = Self(*b"edts");
    pub const UDTA: Self = Self(*b"udta");

    // Fragments
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");

    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&[u8; 4]> for BoxType {
    fn from(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }
}

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type code.
    pub box_type: BoxType,
    /// Box size including header.
    pub size: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl BoxHeader {
    /// Compact header length.
    pub const SIZE: u8 = 8;
    /// Extended (64-bit size) header length.
    pub const LARGE_SIZE: u8 = 16;

    /// Header for a box carrying `payload_size` bytes, picking the extended
    /// form only when the total does not fit in 32 bits.
    pub fn for_payload(box_type: BoxType, payload_size: u64) -> Self {
        let compact = payload_size + Self::SIZE as u64;
        if compact > u32::MAX as u64 {
            Self {
                box_type,
                size: payload_size + Self::LARGE_SIZE as u64,
                header_size: Self::LARGE_SIZE,
            }
        } else {
            Self {
                box_type,
                size: compact,
                header_size: Self::SIZE,
            }
        }
    }

    /// Header size implied by a total box size.
    pub fn header_size_for(size: u64) -> u8 {
        if size > u32::MAX as u64 {
            Self::LARGE_SIZE
        } else {
            Self::SIZE
        }
    }

    /// Read a header, advancing `buf` past it.
    ///
    /// A size of 0 means the box extends to the end of `buf`.
    pub fn read(buf: &mut Bytes) -> Result<Self> {
        let available = buf.remaining() as u64;
        if available < Self::SIZE as u64 {
            return Err(Error::truncated(Self::SIZE as u64, available));
        }

        let size = buf.get_u32() as u64;
        let mut box_type = [0u8; 4];
        buf.copy_to_slice(&mut box_type);
        let box_type = BoxType(box_type);

        let (size, header_size) = match size {
            1 => {
                if buf.remaining() < 8 {
                    return Err(Error::truncated(
                        Self::LARGE_SIZE as u64,
                        Self::SIZE as u64 + buf.remaining() as u64,
                    ));
                }
                (buf.get_u64(), Self::LARGE_SIZE)
            }
            0 => (buf.remaining() as u64 + Self::SIZE as u64, Self::SIZE),
            n => (n, Self::SIZE),
        };

        if size < header_size as u64 {
            return Err(Error::parse(format!(
                "box '{}' declares size {} smaller than its {}-byte header",
                box_type, size, header_size
            )));
        }

        Ok(Self {
            box_type,
            size,
            header_size,
        })
    }

    /// Write the header.
    pub fn write(&self, buf: &mut BytesMut) {
        if self.header_size == Self::LARGE_SIZE {
            buf.put_u32(1);
            buf.put_slice(&self.box_type.0);
            buf.put_u64(self.size);
        } else {
            buf.put_u32(self.size as u32);
            buf.put_slice(&self.box_type.0);
        }
    }

    /// Get the payload size (size - header).
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }
}

/// Read the `version` and 24-bit `flags` of a full box.
pub fn read_version_and_flags(buf: &mut Bytes) -> Result<(u8, u32)> {
    ensure_remaining(buf, 4)?;
    let word = buf.get_u32();
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
}

/// Write the `version` and 24-bit `flags` of a full box.
pub fn write_version_and_flags(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
}

/// Fail with a truncation error unless `need` bytes remain.
pub fn ensure_remaining(buf: &Bytes, need: usize) -> Result<()> {
    if buf.remaining() < need {
        return Err(Error::truncated(need as u64, buf.remaining() as u64));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_compact_header() {
        let mut buf = Bytes::from_static(&[0, 0, 0, 12, b'p', b'a', b'y', b'l', 1, 2, 3, 4]);
        let header = BoxHeader::read(&mut buf).unwrap();
        assert_eq!(header.box_type, BoxType::PAYL);
        assert_eq!(header.size, 12);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.payload_size(), 4);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_read_extended_header() {
        let mut raw = vec![0, 0, 0, 1];
        raw.extend_from_slice(b"mdat");
        raw.extend_from_slice(&20u64.to_be_bytes());
        raw.extend_from_slice(&[9; 4]);
        let mut buf = Bytes::from(raw);
        let header = BoxHeader::read(&mut buf).unwrap();
        assert_eq!(header.size, 20);
        assert_eq!(header.header_size, 16);
        assert_eq!(header.payload_size(), 4);
    }

    #[test]
    fn test_size_zero_extends_to_end() {
        let mut buf = Bytes::from_static(&[0, 0, 0, 0, b'f', b'r', b'e', b'e', 7, 7, 7]);
        let header = BoxHeader::read(&mut buf).unwrap();
        assert_eq!(header.size, 11);
        assert_eq!(header.payload_size(), 3);
    }

    #[test]
    fn test_undersized_header_is_parse_error() {
        let mut buf = Bytes::from_static(&[0, 0, 0, 4, b'v', b't', b't', b'e']);
        assert!(matches!(BoxHeader::read(&mut buf), Err(Error::Parse(_))));
    }

    #[test]
    fn test_short_input_is_truncated() {
        let mut buf = Bytes::from_static(&[0, 0, 0]);
        assert!(matches!(
            BoxHeader::read(&mut buf),
            Err(Error::Truncated { need: 8, have: 3 })
        ));
    }

    #[test]
    fn test_for_payload_switches_to_extended_form() {
        let small = BoxHeader::for_payload(BoxType::MDAT, 100);
        assert_eq!(small.header_size, 8);
        assert_eq!(small.size, 108);

        let large = BoxHeader::for_payload(BoxType::MDAT, u32::MAX as u64);
        assert_eq!(large.header_size, 16);
        assert_eq!(large.size, u32::MAX as u64 + 16);
        assert_eq!(BoxHeader::header_size_for(large.size), 16);

        let mut buf = BytesMut::new();
        large.write(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &[0, 0, 0, 1]);
        assert_eq!(&buf[4..8], b"mdat");
    }

    #[test]
    fn test_version_and_flags() {
        let mut out = BytesMut::new();
        write_version_and_flags(&mut out, 1, 0x020001);
        assert_eq!(&out[..], &[1, 0x02, 0x00, 0x01]);
        let mut buf = out.freeze();
        assert_eq!(read_version_and_flags(&mut buf).unwrap(), (1, 0x020001));
    }
}
