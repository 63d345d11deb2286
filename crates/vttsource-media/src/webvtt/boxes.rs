//! WebVTT box variants: string boxes, cue box, empty-cue marker and the
//! `wvtt` sample entry.

use crate::boxes::{
    compute_children_size, payload_any, read_box_list, BoxHeader, BoxPayload, BoxType,
    DumpWriter, IsoBox, ReadContext,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use vttsource_common::Result;

/// Text payload of `iden`, `sttg`, `payl`, `ctim` and `vttC` boxes.
///
/// The wire payload is the text up to (not including) the first NUL byte;
/// no terminator is ever written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringBox {
    value: Vec<u8>,
}

impl StringBox {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Concatenate a fragment onto the current value.
    pub fn append(&mut self, fragment: impl AsRef<[u8]>) {
        let end = self.text_len();
        self.value.truncate(end);
        self.value.extend_from_slice(fragment.as_ref());
    }

    /// The text, without any trailing NUL.
    pub fn as_bytes(&self) -> &[u8] {
        &self.value[..self.text_len()]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.text_len() == 0
    }

    fn text_len(&self) -> usize {
        self.value
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.value.len())
    }

    pub(crate) fn parse(_: BoxType, payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        Ok(Box::new(Self::new(payload.to_vec())))
    }

    /// Size of this string framed as a box.
    fn boxed_size(&self, box_type: BoxType) -> u64 {
        BoxHeader::for_payload(box_type, self.text_len() as u64).size
    }

    /// Frame and write this string as a child box.
    fn write_boxed(&self, box_type: BoxType, buf: &mut BytesMut) {
        BoxHeader::for_payload(box_type, self.text_len() as u64).write(buf);
        buf.put_slice(self.as_bytes());
    }

    fn dump_boxed(&self, box_type: BoxType, w: &mut DumpWriter) {
        self.dump(box_type, self.boxed_size(box_type), w);
    }
}

impl From<&str> for StringBox {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl BoxPayload for StringBox {
    fn compute_size(&mut self) -> Result<u64> {
        Ok(self.text_len() as u64)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(self.as_bytes());
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        let text = w.text(self.as_bytes());
        w.begin_box("StringBox", box_type, size, &[("string", text)]);
        w.end_box("StringBox");
    }

    payload_any!();
}

/// A single cue (`vtcu`).
///
/// Known children are routed into their fields; anything else is kept in
/// `other_boxes`, shown in dumps but never written back.
#[derive(Debug, Default)]
pub struct CueBox {
    pub id: Option<StringBox>,
    pub settings: Option<StringBox>,
    pub payload: Option<StringBox>,
    /// Cue current time (`ctim`). Read only.
    pub time: Option<StringBox>,
    pub other_boxes: Vec<IsoBox>,
}

impl CueBox {
    pub(crate) fn parse(_: BoxType, payload: Bytes, ctx: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let mut cue = Self::default();
        for child in read_box_list(payload, ctx)? {
            let box_type = child.box_type();
            let slot = match box_type {
                BoxType::IDEN => &mut cue.id,
                BoxType::STTG => &mut cue.settings,
                BoxType::PAYL => &mut cue.payload,
                BoxType::CTIM => &mut cue.time,
                _ => {
                    cue.other_boxes.push(child);
                    continue;
                }
            };
            match child.into_payload::<StringBox>() {
                Ok(string) => {
                    if slot.is_some() {
                        tracing::debug!("Repeated '{}' in cue box, keeping the last one", box_type);
                    }
                    *slot = Some(string);
                }
                Err(child) => cue.other_boxes.push(child),
            }
        }
        Ok(Box::new(cue))
    }

    fn written_children(&self) -> impl Iterator<Item = (BoxType, &StringBox)> {
        [
            (BoxType::IDEN, self.id.as_ref()),
            (BoxType::STTG, self.settings.as_ref()),
            (BoxType::PAYL, self.payload.as_ref()),
        ]
        .into_iter()
        .filter_map(|(box_type, string)| string.map(|s| (box_type, s)))
    }
}

impl BoxPayload for CueBox {
    fn compute_size(&mut self) -> Result<u64> {
        // Overflow children are sized for the dump but not counted.
        compute_children_size(&mut self.other_boxes)?;
        Ok(self
            .written_children()
            .map(|(box_type, string)| string.boxed_size(box_type))
            .sum())
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        for (box_type, string) in self.written_children() {
            string.write_boxed(box_type, buf);
        }
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box("WebVTTCueBox", box_type, size, &[]);
        for (child_type, string) in self.written_children() {
            string.dump_boxed(child_type, w);
        }
        if let Some(time) = &self.time {
            time.dump_boxed(BoxType::CTIM, w);
        }
        for child in &self.other_boxes {
            child.dump_into(w);
        }
        w.end_box("WebVTTCueBox");
    }

    payload_any!();
}

/// Marker for an interval with no active cue (`vtte`).
#[derive(Debug, Default)]
pub struct EmptyCueBox {
    pub other_boxes: Vec<IsoBox>,
}

impl EmptyCueBox {
    pub(crate) fn parse(box_type: BoxType, payload: Bytes, ctx: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        if payload.has_remaining() {
            tracing::debug!("'{}' carries {} unexpected bytes", box_type, payload.len());
        }
        Ok(Box::new(Self {
            other_boxes: read_box_list(payload, ctx)?,
        }))
    }
}

impl BoxPayload for EmptyCueBox {
    fn compute_size(&mut self) -> Result<u64> {
        compute_children_size(&mut self.other_boxes)?;
        Ok(0)
    }

    fn write_payload(&self, _buf: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box("WebVTTEmptyCueBox", box_type, size, &[]);
        for child in &self.other_boxes {
            child.dump_into(w);
        }
        w.end_box("WebVTTEmptyCueBox");
    }

    payload_any!();
}

/// WebVTT sample entry (`wvtt`): the track's cue template in a `vttC` box.
///
/// On the wire the payload is exactly the `vttC` box. Entries written with
/// the 8-byte generic sample-entry prefix are accepted on read.
#[derive(Debug, Default)]
pub struct WebVttSampleEntry {
    /// 1-based index into the track's data references.
    pub data_reference_index: u16,
    pub config: StringBox,
    pub other_boxes: Vec<IsoBox>,
}

impl WebVttSampleEntry {
    pub fn new(config: impl Into<Vec<u8>>) -> Self {
        Self {
            data_reference_index: 1,
            config: StringBox::new(config),
            other_boxes: Vec::new(),
        }
    }

    pub(crate) fn parse(_: BoxType, mut payload: Bytes, ctx: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        let mut entry = Self::default();
        // A child box never starts with six zero bytes, so this is the
        // reserved field of the generic prefix.
        if has_sample_entry_prefix(&payload) {
            payload.advance(6);
            entry.data_reference_index = payload.get_u16();
        }

        for child in read_box_list(payload, ctx)? {
            if child.box_type() == BoxType::VTTC {
                match child.into_payload::<StringBox>() {
                    Ok(config) => entry.config = config,
                    Err(child) => entry.other_boxes.push(child),
                }
            } else {
                entry.other_boxes.push(child);
            }
        }
        Ok(Box::new(entry))
    }
}

fn has_sample_entry_prefix(payload: &Bytes) -> bool {
    payload.len() >= 8 && payload[..6].iter().all(|b| *b == 0)
}

impl BoxPayload for WebVttSampleEntry {
    fn compute_size(&mut self) -> Result<u64> {
        compute_children_size(&mut self.other_boxes)?;
        Ok(self.config.boxed_size(BoxType::VTTC))
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        self.config.write_boxed(BoxType::VTTC, buf);
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box(
            "WebVTTSampleEntryBox",
            box_type,
            size,
            &[("DataReferenceIndex", self.data_reference_index.to_string())],
        );
        self.config.dump_boxed(BoxType::VTTC, w);
        for child in &self.other_boxes {
            child.dump_into(w);
        }
        w.end_box("WebVTTSampleEntryBox");
    }

    payload_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{BoxRegistry, RawBox};

    fn reparse(mut b: IsoBox) -> IsoBox {
        let mut bytes = b.to_bytes().unwrap();
        IsoBox::read(&mut bytes, &BoxRegistry::new()).unwrap()
    }

    #[test]
    fn test_string_box_stops_at_nul() {
        let mut s = StringBox::new(b"abc\0junk".to_vec());
        assert_eq!(s.as_bytes(), b"abc");
        assert_eq!(s.compute_size().unwrap(), 3);
        s.append("def");
        assert_eq!(s.as_bytes(), b"abcdef");

        let parsed = reparse(IsoBox::new(BoxType::PAYL, StringBox::new(b"hi\0".to_vec())));
        assert_eq!(parsed.size(), 10);
        assert_eq!(parsed.payload::<StringBox>().unwrap().as_bytes(), b"hi");
    }

    #[test]
    fn test_cue_box_roundtrip() {
        let cue = CueBox {
            id: Some("1".into()),
            settings: Some("align:start".into()),
            payload: Some("Hello".into()),
            ..CueBox::default()
        };
        let parsed = reparse(IsoBox::new(BoxType::VTCU, cue));
        let cue = parsed.payload::<CueBox>().unwrap();
        assert_eq!(cue.id.as_ref().unwrap().as_bytes(), b"1");
        assert_eq!(cue.settings.as_ref().unwrap().as_bytes(), b"align:start");
        assert_eq!(cue.payload.as_ref().unwrap().as_bytes(), b"Hello");
        assert!(cue.time.is_none());
    }

    #[test]
    fn test_cue_box_write_order_is_fixed() {
        // payl before iden on the wire
        let data: &[u8] = &[
            0, 0, 0, 26, b'v', b't', b'c', b'u', //
            0, 0, 0, 9, b'p', b'a', b'y', b'l', b'x', //
            0, 0, 0, 9, b'i', b'd', b'e', b'n', b'7',
        ];
        let mut buf = Bytes::copy_from_slice(data);
        let mut cue = IsoBox::read(&mut buf, &BoxRegistry::new()).unwrap();
        let out = cue.to_bytes().unwrap();
        assert_eq!(&out[8..16], &[0, 0, 0, 9, b'i', b'd', b'e', b'n']);
        assert_eq!(&out[17..25], &[0, 0, 0, 9, b'p', b'a', b'y', b'l']);
    }

    #[test]
    fn test_cue_box_last_repeat_wins_and_time_not_written() {
        let data: &[u8] = &[
            0, 0, 0, 35, b'v', b't', b'c', b'u', //
            0, 0, 0, 9, b'p', b'a', b'y', b'l', b'a', //
            0, 0, 0, 9, b'p', b'a', b'y', b'l', b'b', //
            0, 0, 0, 9, b'c', b't', b'i', b'm', b't',
        ];
        let mut buf = Bytes::copy_from_slice(data);
        let mut b = IsoBox::read(&mut buf, &BoxRegistry::new()).unwrap();
        let cue = b.payload::<CueBox>().unwrap();
        assert_eq!(cue.payload.as_ref().unwrap().as_bytes(), b"b");
        assert_eq!(cue.time.as_ref().unwrap().as_bytes(), b"t");
        assert_eq!(b.compute_size().unwrap(), 8 + 9);
    }

    #[test]
    fn test_cue_box_overflow_children() {
        let data: &[u8] = &[
            0, 0, 0, 27, b'v', b't', b'c', b'u', //
            0, 0, 0, 10, b'z', b'z', b'z', b'z', 1, 2, //
            0, 0, 0, 9, b'p', b'a', b'y', b'l', b'x',
        ];
        let mut buf = Bytes::copy_from_slice(data);
        let mut b = IsoBox::read(&mut buf, &BoxRegistry::new()).unwrap();
        {
            let cue = b.payload::<CueBox>().unwrap();
            assert_eq!(cue.other_boxes.len(), 1);
            assert!(cue.other_boxes[0].payload::<RawBox>().is_some());
        }
        assert!(b.dump().contains("UnknownBox"));
        assert_eq!(b.to_bytes().unwrap().len(), 8 + 9);
    }

    #[test]
    fn test_empty_cue_is_bare_header() {
        let mut b = IsoBox::new(BoxType::VTTE, EmptyCueBox::default());
        let bytes = b.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), &[0, 0, 0, 8, b'v', b't', b't', b'e']);
        let parsed = reparse(b);
        assert!(parsed.payload::<EmptyCueBox>().is_some());
    }

    #[test]
    fn test_sample_entry_roundtrip() {
        let parsed = reparse(IsoBox::new(BoxType::WVTT, WebVttSampleEntry::new("WEBVTT")));
        assert_eq!(parsed.size(), 8 + 8 + 6);
        let entry = parsed.payload::<WebVttSampleEntry>().unwrap();
        assert_eq!(entry.config.as_bytes(), b"WEBVTT");
    }

    #[test]
    fn test_sample_entry_with_generic_prefix() {
        let data: &[u8] = &[
            0, 0, 0, 30, b'w', b'v', b't', b't', //
            0, 0, 0, 0, 0, 0, 0, 3, //
            0, 0, 0, 14, b'v', b't', b't', b'C', b'W', b'E', b'B', b'V', b'T', b'T',
        ];
        let mut buf = Bytes::copy_from_slice(data);
        let b = IsoBox::read(&mut buf, &BoxRegistry::new()).unwrap();
        let entry = b.payload::<WebVttSampleEntry>().unwrap();
        assert_eq!(entry.data_reference_index, 3);
        assert_eq!(entry.config.as_bytes(), b"WEBVTT");
    }

    #[test]
    fn test_cue_dump() {
        let cue = CueBox {
            id: Some("c1".into()),
            payload: Some("Hello".into()),
            ..CueBox::default()
        };
        let mut b = IsoBox::new(BoxType::VTCU, cue);
        b.compute_size().unwrap();
        let dump = b.dump();
        assert!(dump.starts_with("<WebVTTCueBox>\n"));
        assert!(dump.contains("<StringBox string=\"Hello\">"));
        assert!(dump.contains("Type=\"iden\""));
    }
}
