//! Movie fragment headers: `mfhd`, `tfhd`, `tfdt` and `trun`.

use super::{
    ensure_remaining, payload_any, read_version_and_flags, write_version_and_flags, BoxPayload,
    BoxType, DumpWriter, ReadContext,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use vttsource_common::Result;

/// Movie fragment header (`mfhd`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MfhdBox {
    pub sequence_number: u32,
}

impl MfhdBox {
    pub fn new(sequence_number: u32) -> Self {
        Self { sequence_number }
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let _ = read_version_and_flags(&mut payload)?;
        ensure_remaining(&payload, 4)?;
        Ok(Box::new(Self::new(payload.get_u32())))
    }
}

impl BoxPayload for MfhdBox {
    fn compute_size(&mut self) -> Result<u64> {
        Ok(8)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        write_version_and_flags(buf, 0, 0);
        buf.put_u32(self.sequence_number);
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "MovieFragmentHeaderBox",
            box_type,
            size,
            &[("FragmentSequenceNumber", self.sequence_number.to_string())],
        );
        w.end_box("MovieFragmentHeaderBox");
    }

    payload_any!();
}

/// Track fragment header (`tfhd`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TfhdBox {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,
}

impl TfhdBox {
    const BASE_DATA_OFFSET: u32 = 0x01;
    const SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
    const DEFAULT_DURATION: u32 = 0x08;
    const DEFAULT_SIZE: u32 = 0x10;
    const DEFAULT_FLAGS: u32 = 0x20;
    const DURATION_IS_EMPTY: u32 = 0x01_0000;
    const DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            ..Self::default()
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.base_data_offset.is_some() {
            flags |= Self::BASE_DATA_OFFSET;
        }
        if self.sample_description_index.is_some() {
            flags |= Self::SAMPLE_DESCRIPTION_INDEX;
        }
        if self.default_sample_duration.is_some() {
            flags |= Self::DEFAULT_DURATION;
        }
        if self.default_sample_size.is_some() {
            flags |= Self::DEFAULT_SIZE;
        }
        if self.default_sample_flags.is_some() {
            flags |= Self::DEFAULT_FLAGS;
        }
        if self.duration_is_empty {
            flags |= Self::DURATION_IS_EMPTY;
        }
        if self.default_base_is_moof {
            flags |= Self::DEFAULT_BASE_IS_MOOF;
        }
        flags
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let (_, flags) = read_version_and_flags(&mut payload)?;
        ensure_remaining(&payload, 4)?;
        let mut tfhd = Self::new(payload.get_u32());

        if flags & Self::BASE_DATA_OFFSET != 0 {
            ensure_remaining(&payload, 8)?;
            tfhd.base_data_offset = Some(payload.get_u64());
        }
        let mut optional_u32 = |bit: u32| -> Result<Option<u32>> {
            if flags & bit == 0 {
                return Ok(None);
            }
            ensure_remaining(&payload, 4)?;
            Ok(Some(payload.get_u32()))
        };
        tfhd.sample_description_index = optional_u32(Self::SAMPLE_DESCRIPTION_INDEX)?;
        tfhd.default_sample_duration = optional_u32(Self::DEFAULT_DURATION)?;
        tfhd.default_sample_size = optional_u32(Self::DEFAULT_SIZE)?;
        tfhd.default_sample_flags = optional_u32(Self::DEFAULT_FLAGS)?;
        tfhd.duration_is_empty = flags & Self::DURATION_IS_EMPTY != 0;
        tfhd.default_base_is_moof = flags & Self::DEFAULT_BASE_IS_MOOF != 0;

        Ok(Box::new(tfhd))
    }
}

impl BoxPayload for TfhdBox {
    fn compute_size(&mut self) -> Result<u64> {
        let mut size = 8;
        if self.base_data_offset.is_some() {
            size += 8;
        }
        for field in [
            self.sample_description_index,
            self.default_sample_duration,
            self.default_sample_size,
            self.default_sample_flags,
        ] {
            if field.is_some() {
                size += 4;
            }
        }
        Ok(size)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        write_version_and_flags(buf, 0, self.flags());
        buf.put_u32(self.track_id);
        if let Some(offset) = self.base_data_offset {
            buf.put_u64(offset);
        }
        for value in [
            self.sample_description_index,
            self.default_sample_duration,
            self.default_sample_size,
            self.default_sample_flags,
        ]
        .into_iter()
        .flatten()
        {
            buf.put_u32(value);
        }
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        let mut attrs = vec![("TrackID", self.track_id.to_string())];
        if let Some(duration) = self.default_sample_duration {
            attrs.push(("SampleDuration", duration.to_string()));
        }
        if let Some(size) = self.default_sample_size {
            attrs.push(("SampleSize", size.to_string()));
        }
        w.begin_box("TrackFragmentHeaderBox", box_type, size, &attrs);
        w.end_box("TrackFragmentHeaderBox");
    }

    payload_any!();
}

/// Track fragment decode time (`tfdt`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TfdtBox {
    /// Decode time of the first sample, in track timescale units.
    pub base_media_decode_time: u64,
}

impl TfdtBox {
    pub fn new(base_media_decode_time: u64) -> Self {
        Self {
            base_media_decode_time,
        }
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let (version, _) = read_version_and_flags(&mut payload)?;
        let base_media_decode_time = if version == 1 {
            ensure_remaining(&payload, 8)?;
            payload.get_u64()
        } else {
            ensure_remaining(&payload, 4)?;
            payload.get_u32() as u64
        };
        Ok(Box::new(Self::new(base_media_decode_time)))
    }
}

impl BoxPayload for TfdtBox {
    fn compute_size(&mut self) -> Result<u64> {
        Ok(if self.base_media_decode_time > u32::MAX as u64 { 12 } else { 8 })
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        if self.base_media_decode_time > u32::MAX as u64 {
            write_version_and_flags(buf, 1, 0);
            buf.put_u64(self.base_media_decode_time);
        } else {
            write_version_and_flags(buf, 0, 0);
            buf.put_u32(self.base_media_decode_time as u32);
        }
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "TrackFragmentBaseMediaDecodeTimeBox",
            box_type,
            size,
            &[("baseMediaDecodeTime", self.base_media_decode_time.to_string())],
        );
        w.end_box("TrackFragmentBaseMediaDecodeTimeBox");
    }

    payload_any!();
}

/// One sample record of a track run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrunEntry {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_time_offset: Option<i32>,
}

/// Track run (`trun`).
///
/// Per-sample fields are present for every entry or for none; the presence
/// of each is taken from the first entry when writing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrunBox {
    pub version: u8,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub entries: Vec<TrunEntry>,
}

impl TrunBox {
    const DATA_OFFSET: u32 = 0x001;
    const FIRST_SAMPLE_FLAGS: u32 = 0x004;
    const SAMPLE_DURATION: u32 = 0x100;
    const SAMPLE_SIZE: u32 = 0x200;
    const SAMPLE_FLAGS: u32 = 0x400;
    const SAMPLE_CTO: u32 = 0x800;

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.data_offset.is_some() {
            flags |= Self::DATA_OFFSET;
        }
        if self.first_sample_flags.is_some() {
            flags |= Self::FIRST_SAMPLE_FLAGS;
        }
        if let Some(first) = self.entries.first() {
            if first.duration.is_some() {
                flags |= Self::SAMPLE_DURATION;
            }
            if first.size.is_some() {
                flags |= Self::SAMPLE_SIZE;
            }
            if first.flags.is_some() {
                flags |= Self::SAMPLE_FLAGS;
            }
            if first.composition_time_offset.is_some() {
                flags |= Self::SAMPLE_CTO;
            }
        }
        flags
    }

    /// Upper bound on the sample count of a run whose entries carry no
    /// fields, since the payload length cannot bound it.
    pub const MAX_FIELDLESS_SAMPLES: u32 = 1 << 16;

    fn entry_size(flags: u32) -> usize {
        [
            Self::SAMPLE_DURATION,
            Self::SAMPLE_SIZE,
            Self::SAMPLE_FLAGS,
            Self::SAMPLE_CTO,
        ]
        .iter()
        .filter(|bit| flags & **bit != 0)
        .count()
            * 4
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let (version, flags) = read_version_and_flags(&mut payload)?;
        ensure_remaining(&payload, 4)?;
        let sample_count = payload.get_u32();

        let mut trun = Self {
            version,
            ..Self::default()
        };
        if flags & Self::DATA_OFFSET != 0 {
            ensure_remaining(&payload, 4)?;
            trun.data_offset = Some(payload.get_i32());
        }
        if flags & Self::FIRST_SAMPLE_FLAGS != 0 {
            ensure_remaining(&payload, 4)?;
            trun.first_sample_flags = Some(payload.get_u32());
        }

        let entry_size = Self::entry_size(flags);
        if entry_size == 0 && sample_count > Self::MAX_FIELDLESS_SAMPLES {
            return Err(vttsource_common::Error::parse(format!(
                "trun declares {} samples without per-sample fields",
                sample_count
            )));
        }
        let need = entry_size
            .checked_mul(sample_count as usize)
            .ok_or_else(|| vttsource_common::Error::parse("trun sample count overflows"))?;
        ensure_remaining(&payload, need)?;
        trun.entries.reserve(sample_count as usize);
        for _ in 0..sample_count {
            let mut entry = TrunEntry::default();
            if flags & Self::SAMPLE_DURATION != 0 {
                entry.duration = Some(payload.get_u32());
            }
            if flags & Self::SAMPLE_SIZE != 0 {
                entry.size = Some(payload.get_u32());
            }
            if flags & Self::SAMPLE_FLAGS != 0 {
                entry.flags = Some(payload.get_u32());
            }
            if flags & Self::SAMPLE_CTO != 0 {
                entry.composition_time_offset = Some(payload.get_i32());
            }
            trun.entries.push(entry);
        }
        Ok(Box::new(trun))
    }
}

impl BoxPayload for TrunBox {
    fn compute_size(&mut self) -> Result<u64> {
        let flags = self.flags();
        let mut size = 8;
        if self.data_offset.is_some() {
            size += 4;
        }
        if self.first_sample_flags.is_some() {
            size += 4;
        }
        Ok(size + (Self::entry_size(flags) * self.entries.len()) as u64)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        let flags = self.flags();
        write_version_and_flags(buf, self.version, flags);
        buf.put_u32(self.entries.len() as u32);
        if let Some(offset) = self.data_offset {
            buf.put_i32(offset);
        }
        if let Some(first) = self.first_sample_flags {
            buf.put_u32(first);
        }
        for entry in &self.entries {
            if flags & Self::SAMPLE_DURATION != 0 {
                buf.put_u32(entry.duration.unwrap_or(0));
            }
            if flags & Self::SAMPLE_SIZE != 0 {
                buf.put_u32(entry.size.unwrap_or(0));
            }
            if flags & Self::SAMPLE_FLAGS != 0 {
                buf.put_u32(entry.flags.unwrap_or(0));
            }
            if flags & Self::SAMPLE_CTO != 0 {
                buf.put_i32(entry.composition_time_offset.unwrap_or(0));
            }
        }
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "TrackRunBox",
            box_type,
            size,
            &[("SampleCount", self.entries.len().to_string())],
        );
        w.end_box("TrackRunBox");
    }

    payload_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{BoxRegistry, IsoBox};

    fn reparse<T: BoxPayload>(box_type: BoxType, payload: T) -> T {
        let mut b = IsoBox::new(box_type, payload);
        let mut bytes = b.to_bytes().unwrap();
        IsoBox::read(&mut bytes, &BoxRegistry::new())
            .unwrap()
            .into_payload::<T>()
            .unwrap()
    }

    #[test]
    fn test_tfhd_optional_fields() {
        let mut tfhd = TfhdBox::new(3);
        tfhd.default_sample_duration = Some(1000);
        tfhd.default_base_is_moof = true;
        assert_eq!(tfhd.flags(), 0x02_0008);

        let parsed = reparse(BoxType::TFHD, tfhd.clone());
        assert_eq!(parsed, tfhd);
        assert!(parsed.default_sample_size.is_none());
    }

    #[test]
    fn test_tfdt_switches_to_64_bit() {
        let mut small = IsoBox::new(BoxType::TFDT, TfdtBox::new(90_000));
        assert_eq!(small.compute_size().unwrap(), 16);
        let mut large = IsoBox::new(BoxType::TFDT, TfdtBox::new(u32::MAX as u64 + 1));
        assert_eq!(large.compute_size().unwrap(), 20);
        assert_eq!(
            reparse(BoxType::TFDT, TfdtBox::new(u32::MAX as u64 + 1)).base_media_decode_time,
            u32::MAX as u64 + 1
        );
    }

    #[test]
    fn test_trun_entries() {
        let trun = TrunBox {
            version: 0,
            data_offset: Some(120),
            first_sample_flags: None,
            entries: vec![
                TrunEntry {
                    duration: Some(2000),
                    size: Some(31),
                    ..TrunEntry::default()
                },
                TrunEntry {
                    duration: Some(1000),
                    size: Some(8),
                    ..TrunEntry::default()
                },
            ],
        };
        let mut b = IsoBox::new(BoxType::TRUN, trun.clone());
        assert_eq!(b.compute_size().unwrap(), 8 + 8 + 4 + 16);
        assert_eq!(reparse(BoxType::TRUN, trun.clone()), trun);
    }

    #[test]
    fn test_trun_truncated_entries() {
        // One declared sample with a duration, but no sample bytes.
        let payload = Bytes::from_static(&[0, 0, 0x01, 0x00, 0, 0, 0, 1]);
        let err = TrunBox::parse(BoxType::TRUN, payload, &ReadContext::new(&BoxRegistry::new())).unwrap_err();
        assert!(matches!(err, vttsource_common::Error::Truncated { .. }));
    }

    #[test]
    fn test_trun_fieldless_count_is_bounded() {
        // No per-sample fields and a sample count of u32::MAX.
        let payload = Bytes::from_static(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        let err = TrunBox::parse(BoxType::TRUN, payload, &ReadContext::new(&BoxRegistry::new())).unwrap_err();
        assert!(matches!(err, vttsource_common::Error::Parse(_)));

        // Small field-less runs take their values from the track defaults.
        let payload = Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 3]);
        let trun = TrunBox::parse(BoxType::TRUN, payload, &ReadContext::new(&BoxRegistry::new()))
            .unwrap()
            .into_any()
            .downcast::<TrunBox>()
            .unwrap();
        assert_eq!(trun.entries, vec![TrunEntry::default(); 3]);
    }
}
