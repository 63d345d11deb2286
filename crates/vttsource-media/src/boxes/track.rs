//! Track-level boxes: media header, handler and sample description list.

use super::{
    compute_children_size, ensure_remaining, payload_any, read_box_list, read_version_and_flags,
    write_children, write_version_and_flags, BoxPayload, BoxType, DumpWriter, IsoBox, ReadContext,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use vttsource_common::{Error, Result};

/// Media header box (`mdhd`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdhdBox {
    pub version: u8,
    pub flags: u32,
    /// Seconds since 1904-01-01 UTC.
    pub creation_time: u64,
    /// Seconds since 1904-01-01 UTC.
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// Packed ISO-639-2/T language code.
    pub language: u16,
}

impl Default for MdhdBox {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            language: 0x55C4, // "und"
        }
    }
}

impl MdhdBox {
    pub fn new(timescale: u32) -> Self {
        Self {
            timescale,
            ..Self::default()
        }
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let (version, flags) = read_version_and_flags(&mut payload)?;
        let (creation_time, modification_time, timescale, duration) = if version == 1 {
            ensure_remaining(&payload, 28)?;
            (
                payload.get_u64(),
                payload.get_u64(),
                payload.get_u32(),
                payload.get_u64(),
            )
        } else {
            ensure_remaining(&payload, 16)?;
            (
                payload.get_u32() as u64,
                payload.get_u32() as u64,
                payload.get_u32(),
                payload.get_u32() as u64,
            )
        };
        ensure_remaining(&payload, 4)?;
        let language = payload.get_u16();
        let _pre_defined = payload.get_u16();

        Ok(Box::new(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
        }))
    }

    /// Version needed to represent the current field values.
    fn effective_version(&self) -> u8 {
        if self.version == 1
            || self.creation_time > u32::MAX as u64
            || self.modification_time > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }
}

impl BoxPayload for MdhdBox {
    fn compute_size(&mut self) -> Result<u64> {
        Ok(if self.effective_version() == 1 { 36 } else { 24 })
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        let version = self.effective_version();
        write_version_and_flags(buf, version, self.flags);
        if version == 1 {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        }
        buf.put_u16(self.language);
        buf.put_u16(0);
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "MediaHeaderBox",
            box_type,
            size,
            &[
                ("CreationTime", self.creation_time.to_string()),
                ("ModificationTime", self.modification_time.to_string()),
                ("TimeScale", self.timescale.to_string()),
                ("Duration", self.duration.to_string()),
            ],
        );
        w.end_box("MediaHeaderBox");
    }

    payload_any!();
}

/// Handler reference box (`hdlr`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HdlrBox {
    pub handler_type: [u8; 4],
    pub name: String,
}

impl HdlrBox {
    /// Handler code of timed-text tracks.
    pub const TEXT: [u8; 4] = *b"text";
    /// Handler code of subtitle tracks.
    pub const SUBTITLE: [u8; 4] = *b"subt";
    pub const VIDEO: [u8; 4] = *b"vide";

    pub fn new(handler_type: [u8; 4], name: impl Into<String>) -> Self {
        Self {
            handler_type,
            name: name.into(),
        }
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let _ = read_version_and_flags(&mut payload)?;
        ensure_remaining(&payload, 20)?;
        let _pre_defined = payload.get_u32();
        let mut handler_type = [0u8; 4];
        payload.copy_to_slice(&mut handler_type);
        payload.advance(12);
        let name_bytes = match payload.iter().position(|b| *b == 0) {
            Some(end) => &payload[..end],
            None => &payload[..],
        };
        Ok(Box::new(Self {
            handler_type,
            name: String::from_utf8_lossy(name_bytes).into_owned(),
        }))
    }
}

impl BoxPayload for HdlrBox {
    fn compute_size(&mut self) -> Result<u64> {
        Ok(4 + 4 + 4 + 12 + self.name.len() as u64 + 1)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        write_version_and_flags(buf, 0, 0);
        buf.put_u32(0);
        buf.put_slice(&self.handler_type);
        buf.put_bytes(0, 12);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "HandlerBox",
            box_type,
            size,
            &[
                ("hdlrType", String::from_utf8_lossy(&self.handler_type).into_owned()),
                ("Name", self.name.clone()),
            ],
        );
        w.end_box("HandlerBox");
    }

    payload_any!();
}

/// Sample description box (`stsd`): the list of sample entries of a track.
#[derive(Debug, Default)]
pub struct SampleDescriptionBox {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<IsoBox>,
}

impl SampleDescriptionBox {
    pub(crate) fn parse(_: BoxType, mut payload: Bytes, ctx: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let (version, flags) = read_version_and_flags(&mut payload)?;
        ensure_remaining(&payload, 4)?;
        let entry_count = payload.get_u32();
        let entries = read_box_list(payload, ctx)?;
        if entries.len() != entry_count as usize {
            tracing::warn!(
                "stsd declares {} entries but contains {}",
                entry_count,
                entries.len()
            );
        }
        Ok(Box::new(Self {
            version,
            flags,
            entries,
        }))
    }

    /// Entry at a 1-based description index.
    pub fn entry(&self, index: u32) -> Option<&IsoBox> {
        index.checked_sub(1).and_then(|i| self.entries.get(i as usize))
    }

    pub fn entry_mut(&mut self, index: u32) -> Option<&mut IsoBox> {
        index
            .checked_sub(1)
            .and_then(move |i| self.entries.get_mut(i as usize))
    }
}

impl BoxPayload for SampleDescriptionBox {
    fn compute_size(&mut self) -> Result<u64> {
        if self.entries.len() > u32::MAX as usize {
            return Err(Error::parameter("too many sample descriptions"));
        }
        Ok(8 + compute_children_size(&mut self.entries)?)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        write_version_and_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        write_children(&self.entries, buf)
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "SampleDescriptionBox",
            box_type,
            size,
            &[("EntryCount", self.entries.len().to_string())],
        );
        for entry in &self.entries {
            entry.dump_into(w);
        }
        w.end_box("SampleDescriptionBox");
    }

    payload_any!();
}
