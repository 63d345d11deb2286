//! Track-description mutation: adding and replacing `wvtt` sample entries on
//! a text track held by a container store.

use super::boxes::{StringBox, WebVttSampleEntry};
use crate::boxes::{
    BoxType, ContainerBox, HdlrBox, IsoBox, MdhdBox, RawBox, SampleDescriptionBox,
};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use vttsource_common::{Error, Result};

/// Seconds between 1904-01-01 and 1970-01-01.
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Current wall-clock time in mp4 time (seconds since 1904-01-01 UTC).
pub fn mp4_time_now() -> u64 {
    Utc::now().timestamp().max(0) as u64 + MP4_EPOCH_OFFSET
}

/// Location of sample data. Both fields unset means "in this file".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataReference {
    pub url: Option<String>,
    pub urn: Option<String>,
}

impl DataReference {
    pub fn is_self_contained(&self) -> bool {
        self.url.is_none() && self.urn.is_none()
    }
}

/// Parameters of a new WebVTT sample description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDescription {
    pub url: Option<String>,
    pub urn: Option<String>,
    /// Cue template written to the entry's `vttC` box.
    pub config: String,
}

/// The parts of a track that the description entry points touch.
#[derive(Debug)]
pub struct MediaTrack {
    pub track_id: u32,
    pub handler: HdlrBox,
    pub media_header: MdhdBox,
    pub data_references: Vec<DataReference>,
    pub sample_descriptions: SampleDescriptionBox,
    pub layer: i16,
    /// 16.16 fixed point.
    pub width: u32,
    /// 16.16 fixed point.
    pub height: u32,
    /// Matrix translation (tx, ty), 16.16 fixed point.
    pub translation: (i32, i32),
}

impl MediaTrack {
    pub fn new(track_id: u32, handler_type: [u8; 4], timescale: u32) -> Self {
        Self {
            track_id,
            handler: HdlrBox::new(handler_type, ""),
            media_header: MdhdBox::new(timescale),
            data_references: Vec::new(),
            sample_descriptions: SampleDescriptionBox::default(),
            layer: 0,
            width: 0,
            height: 0,
            translation: (0, 0),
        }
    }

    /// A timed-text track.
    pub fn text(track_id: u32, timescale: u32) -> Self {
        let mut track = Self::new(track_id, HdlrBox::TEXT, timescale);
        track.handler.name = "WebVTT".to_string();
        track
    }

    pub fn is_text(&self) -> bool {
        self.handler.handler_type == HdlrBox::TEXT
    }

    pub fn is_visual(&self) -> bool {
        self.handler.handler_type == HdlrBox::VIDEO
    }

    /// 1-based index of the matching data reference, adding it if missing.
    pub fn find_or_create_data_reference(
        &mut self,
        url: Option<&str>,
        urn: Option<&str>,
    ) -> Result<u16> {
        let wanted = DataReference {
            url: url.map(str::to_string),
            urn: urn.map(str::to_string),
        };
        let position = match self.data_references.iter().position(|r| *r == wanted) {
            Some(position) => position,
            None => {
                self.data_references.push(wanted);
                self.data_references.len() - 1
            }
        };
        u16::try_from(position + 1)
            .map_err(|_| Error::parameter("too many data references on track"))
    }

    /// Build the `trak` box: `mdia` with media header, handler and the
    /// sample description table.
    pub fn into_trak(self) -> IsoBox {
        let stbl = IsoBox::new(
            BoxType::STBL,
            ContainerBox::with_children(vec![IsoBox::new(BoxType::STSD, self.sample_descriptions)]),
        );
        let minf = IsoBox::new(BoxType::MINF, ContainerBox::with_children(vec![stbl]));
        let mdia = IsoBox::new(
            BoxType::MDIA,
            ContainerBox::with_children(vec![
                IsoBox::new(BoxType::MDHD, self.media_header),
                IsoBox::new(BoxType::HDLR, self.handler),
                minf,
            ]),
        );
        IsoBox::new(BoxType::TRAK, ContainerBox::with_children(vec![mdia]))
    }
}

/// Container-level services used by the description entry points.
pub trait ContainerStore {
    /// Fail with [`Error::Access`] unless the container is open for writing.
    fn check_write_access(&self) -> Result<()>;

    /// Track by 1-based track number.
    fn track_mut(&mut self, track_number: u32) -> Option<&mut MediaTrack>;

    /// Time stamped into the media header on modification.
    fn mp4_time(&self) -> u64 {
        mp4_time_now()
    }
}

/// In-memory movie: a list of tracks and a write flag.
#[derive(Debug, Default)]
pub struct MemoryContainer {
    pub tracks: Vec<MediaTrack>,
    pub writable: bool,
}

impl MemoryContainer {
    pub fn new(writable: bool) -> Self {
        Self {
            tracks: Vec::new(),
            writable,
        }
    }

    /// Add a track, returning its 1-based track number.
    pub fn add_track(&mut self, track: MediaTrack) -> u32 {
        self.tracks.push(track);
        self.tracks.len() as u32
    }

    pub fn track(&self, track_number: u32) -> Option<&MediaTrack> {
        track_number
            .checked_sub(1)
            .and_then(|i| self.tracks.get(i as usize))
    }

    pub fn has_visual_track(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_visual)
    }

    /// Serialize `ftyp` + `moov` for the tracks held here.
    pub fn into_init_segment(self) -> Result<Bytes> {
        let mut ftyp_payload = BytesMut::new();
        ftyp_payload.put_slice(b"iso6");
        ftyp_payload.put_u32(0);
        ftyp_payload.put_slice(b"iso6");
        ftyp_payload.put_slice(b"dash");
        let mut ftyp = IsoBox::new(BoxType::FTYP, RawBox::new(ftyp_payload.freeze()));

        let traks = self.tracks.into_iter().map(MediaTrack::into_trak).collect();
        let mut moov = IsoBox::new(BoxType::MOOV, ContainerBox::with_children(traks));

        let mut buf = BytesMut::new();
        for b in [&mut ftyp, &mut moov] {
            b.compute_size()?;
            b.write(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}

impl ContainerStore for MemoryContainer {
    fn check_write_access(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::access("container is opened read-only"))
        }
    }

    fn track_mut(&mut self, track_number: u32) -> Option<&mut MediaTrack> {
        track_number
            .checked_sub(1)
            .and_then(move |i| self.tracks.get_mut(i as usize))
    }
}

fn text_track<S: ContainerStore + ?Sized>(store: &mut S, track_number: u32) -> Result<&mut MediaTrack> {
    let track = store
        .track_mut(track_number)
        .ok_or_else(|| Error::parameter(format!("no track {}", track_number)))?;
    if !track.is_text() {
        return Err(Error::parameter(format!(
            "track {} has handler '{}', expected 'text'",
            track_number,
            String::from_utf8_lossy(&track.handler.handler_type)
        )));
    }
    Ok(track)
}

/// Append a new `wvtt` entry to a text track. Returns its 1-based index.
pub fn create_description<S: ContainerStore + ?Sized>(
    store: &mut S,
    track_number: u32,
    desc: &TextDescription,
) -> Result<u32> {
    store.check_write_access()?;
    let now = store.mp4_time();
    let track = text_track(store, track_number)?;

    let data_reference_index =
        track.find_or_create_data_reference(desc.url.as_deref(), desc.urn.as_deref())?;
    track.media_header.modification_time = now;

    let mut entry = WebVttSampleEntry::new(desc.config.as_bytes());
    entry.data_reference_index = data_reference_index;
    let entries = &mut track.sample_descriptions.entries;
    entries.push(IsoBox::new(BoxType::WVTT, entry));

    tracing::debug!(
        "Added WebVTT description {} to track {} (data reference {})",
        entries.len(),
        track_number,
        data_reference_index
    );
    Ok(entries.len() as u32)
}

/// Replace the `vttC` config of an existing `wvtt` entry.
pub fn update_description<S: ContainerStore + ?Sized>(
    store: &mut S,
    track_number: u32,
    description_index: u32,
    config: &str,
) -> Result<()> {
    if description_index == 0 {
        return Err(Error::parameter("description index is 1-based"));
    }
    store.check_write_access()?;
    let now = store.mp4_time();
    let track = text_track(store, track_number)?;

    let entry = track
        .sample_descriptions
        .entry_mut(description_index)
        .filter(|b| b.box_type() == BoxType::WVTT)
        .and_then(|b| b.payload_mut::<WebVttSampleEntry>())
        .ok_or_else(|| {
            Error::parameter(format!(
                "description {} of track {} is not a WebVTT entry",
                description_index, track_number
            ))
        })?;
    entry.config = StringBox::new(config);
    track.media_header.modification_time = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vttsource_common::ErrorKind;

    fn movie() -> MemoryContainer {
        let mut movie = MemoryContainer::new(true);
        movie.add_track(MediaTrack::text(1, 1000));
        movie.add_track(MediaTrack::new(2, HdlrBox::VIDEO, 90_000));
        movie
    }

    fn desc(config: &str) -> TextDescription {
        TextDescription {
            config: config.to_string(),
            ..TextDescription::default()
        }
    }

    #[test]
    fn test_create_returns_one_based_index() {
        let mut movie = movie();
        assert_eq!(create_description(&mut movie, 1, &desc("WEBVTT")).unwrap(), 1);
        assert_eq!(create_description(&mut movie, 1, &desc("WEBVTT\n")).unwrap(), 2);

        let track = movie.track(1).unwrap();
        assert!(track.media_header.modification_time > MP4_EPOCH_OFFSET);
        let entry = track.sample_descriptions.entry(2).unwrap();
        let entry = entry.payload::<WebVttSampleEntry>().unwrap();
        assert_eq!(entry.config.as_bytes(), b"WEBVTT\n");
        assert_eq!(entry.data_reference_index, 1);
    }

    #[test]
    fn test_data_references_are_shared() {
        let mut movie = movie();
        let remote = TextDescription {
            url: Some("http://example.com/subs".to_string()),
            ..desc("")
        };
        create_description(&mut movie, 1, &desc("")).unwrap();
        create_description(&mut movie, 1, &remote).unwrap();
        create_description(&mut movie, 1, &desc("")).unwrap();

        let track = movie.track(1).unwrap();
        assert_eq!(track.data_references.len(), 2);
        let indexes: Vec<u16> = track
            .sample_descriptions
            .entries
            .iter()
            .map(|e| e.payload::<WebVttSampleEntry>().unwrap().data_reference_index)
            .collect();
        assert_eq!(indexes, vec![1, 2, 1]);
    }

    #[test]
    fn test_rejects_non_text_track_and_missing_track() {
        let mut movie = movie();
        let err = create_description(&mut movie, 2, &desc("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
        let err = create_description(&mut movie, 9, &desc("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(movie.track(2).unwrap().sample_descriptions.entries.is_empty());
    }

    #[test]
    fn test_read_only_container() {
        let mut movie = movie();
        movie.writable = false;
        let err = create_description(&mut movie, 1, &desc("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Access);
        assert_eq!(movie.track(1).unwrap().media_header.modification_time, 0);
    }

    #[test]
    fn test_update_description() {
        let mut movie = movie();
        let index = create_description(&mut movie, 1, &desc("old")).unwrap();
        update_description(&mut movie, 1, index, "new").unwrap();
        let entry = movie.track(1).unwrap().sample_descriptions.entry(index).unwrap();
        assert_eq!(
            entry.payload::<WebVttSampleEntry>().unwrap().config.as_bytes(),
            b"new"
        );

        for bad_index in [0, 2] {
            let err = update_description(&mut movie, 1, bad_index, "x").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parameter);
        }
    }

    #[test]
    fn test_update_rejects_foreign_entry() {
        let mut movie = movie();
        movie.tracks[0]
            .sample_descriptions
            .entries
            .push(IsoBox::new(BoxType(*b"tx3g"), RawBox::default()));
        let err = update_description(&mut movie, 1, 1, "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }

    #[test]
    fn test_init_segment_layout() {
        let mut movie = movie();
        create_description(&mut movie, 1, &desc("WEBVTT")).unwrap();
        let init = movie.into_init_segment().unwrap();
        let boxes = crate::boxes::read_boxes(init, crate::boxes::default_registry()).unwrap();
        assert_eq!(boxes[0].box_type(), BoxType::FTYP);
        assert_eq!(boxes[1].box_type(), BoxType::MOOV);
        let wvtt = crate::boxes::find_box(&boxes, BoxType::WVTT).unwrap();
        assert_eq!(
            wvtt.payload::<WebVttSampleEntry>().unwrap().config.as_bytes(),
            b"WEBVTT"
        );
    }
}
