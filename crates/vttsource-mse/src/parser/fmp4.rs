//! Fragmented MP4 WebVTT segment parser.
//!
//! Initialization segments are `ftyp`? + `moov`; media segments are
//! `styp`? + `moof` + `mdat`. Input may arrive in arbitrary chunks: bytes are
//! buffered until a complete top-level box is available.

use super::{EventSink, InitInfo, ParsedSample, ParserCommand, ParserEvent, SegmentParser};
use bytes::{Buf, Bytes, BytesMut};
use vttsource_common::{Error, Result};
use vttsource_media::boxes::{
    default_registry, find_box, BoxHeader, BoxType, ContainerBox, IsoBox, MdhdBox, RawBox,
    SampleDescriptionBox, TfdtBox, TfhdBox, TrunBox, TrunEntry,
};
use vttsource_media::webvtt::WebVttSampleEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    None,
    Init,
    Media,
}

/// Sample layout gathered from a `moof`, waiting for its `mdat`.
#[derive(Debug)]
struct Fragment {
    moof_size: u64,
    tfhd: TfhdBox,
    base_decode_time: Option<u64>,
    runs: Vec<TrunBox>,
}

#[derive(Debug)]
pub struct Fmp4WebVttParser {
    pending: BytesMut,
    segment: Segment,
    timescale: Option<u32>,
    fragment: Option<Fragment>,
    /// Decode time following the last emitted sample, for fragments without `tfdt`.
    next_decode_time: u64,
    playing: bool,
}

impl Fmp4WebVttParser {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            segment: Segment::None,
            timescale: None,
            fragment: None,
            next_decode_time: 0,
            playing: false,
        }
    }

    pub fn timescale(&self) -> Option<u32> {
        self.timescale
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Size of the first complete top-level box in `pending`, if any.
    fn next_box_size(&self) -> Result<Option<usize>> {
        if self.pending.len() < BoxHeader::SIZE as usize {
            return Ok(None);
        }
        let mut peek = &self.pending[..];
        let size = peek.get_u32() as u64;
        let size = match size {
            0 => {
                return Err(Error::parse(
                    "top-level box without a size cannot be streamed",
                ))
            }
            1 => {
                if self.pending.len() < BoxHeader::LARGE_SIZE as usize {
                    return Ok(None);
                }
                peek.advance(4);
                peek.get_u64()
            }
            n => n,
        };
        if size < BoxHeader::SIZE as u64 {
            return Err(Error::parse(format!("box size {} is below the header size", size)));
        }
        let size = usize::try_from(size).map_err(|_| Error::parse("box too large"))?;
        Ok((self.pending.len() >= size).then_some(size))
    }

    fn handle_box(&mut self, data: Bytes, sink: &mut EventSink<'_>) -> Result<()> {
        let box_size = data.len() as u64;
        let mut buf = data;
        let b = IsoBox::read(&mut buf, default_registry())?;
        tracing::debug!("Top-level '{}' ({} bytes)", b.box_type(), box_size);

        match b.box_type() {
            BoxType::FTYP => {
                self.segment = Segment::Init;
                sink(ParserEvent::InitSegmentStart)?;
            }
            BoxType::MOOV => {
                if self.segment != Segment::Init {
                    sink(ParserEvent::InitSegmentStart)?;
                }
                let info = self.read_init(&b)?;
                self.timescale = Some(info.timescale);
                self.segment = Segment::None;
                sink(ParserEvent::InitSegment(info))?;
            }
            BoxType::STYP => {
                self.segment = Segment::Media;
                sink(ParserEvent::MediaSegmentStart)?;
            }
            BoxType::MOOF => {
                if self.segment != Segment::Media {
                    self.segment = Segment::Media;
                    sink(ParserEvent::MediaSegmentStart)?;
                }
                self.fragment = Some(read_fragment(b, box_size)?);
            }
            BoxType::MDAT => {
                let payload = b
                    .into_payload::<RawBox>()
                    .map(|raw| raw.data)
                    .map_err(|_| Error::parse("mdat payload is not raw data"))?;
                let header_size = box_size - payload.len() as u64;
                match self.fragment.take() {
                    Some(fragment) => self.emit_samples(fragment, header_size, payload, sink)?,
                    None => tracing::warn!("Skipping mdat without a preceding moof"),
                }
                self.segment = Segment::None;
                sink(ParserEvent::MediaSegmentEnd)?;
            }
            other => tracing::debug!("Ignoring top-level '{}'", other),
        }
        Ok(())
    }

    fn read_init(&self, moov: &IsoBox) -> Result<InitInfo> {
        let container = moov
            .payload::<ContainerBox>()
            .ok_or_else(|| Error::parse("moov is not a container"))?;

        for trak in container
            .children
            .iter()
            .filter(|c| c.box_type() == BoxType::TRAK)
        {
            let children = std::slice::from_ref(trak);
            let Some(entry) = find_box(children, BoxType::STSD)
                .and_then(|b| b.payload::<SampleDescriptionBox>())
                .and_then(|stsd| stsd.entries.iter().find_map(|e| e.payload::<WebVttSampleEntry>()))
            else {
                continue;
            };
            let timescale = find_box(children, BoxType::MDHD)
                .and_then(|b| b.payload::<MdhdBox>())
                .map(|mdhd| mdhd.timescale)
                .ok_or_else(|| Error::parse("WebVTT track has no media header"))?;
            if timescale == 0 {
                return Err(Error::parse("media timescale is zero"));
            }
            return Ok(InitInfo {
                timescale,
                config: entry.config.to_string_lossy(),
            });
        }
        Err(Error::parse("initialization segment has no WebVTT track"))
    }

    fn emit_samples(
        &mut self,
        fragment: Fragment,
        mdat_header_size: u64,
        payload: Bytes,
        sink: &mut EventSink<'_>,
    ) -> Result<()> {
        let timescale = self
            .timescale
            .ok_or_else(|| Error::parse("media segment before initialization segment"))?
            as f64;
        let tfhd = &fragment.tfhd;
        let mut decode_time = fragment.base_decode_time.unwrap_or(self.next_decode_time);
        // Offset of the mdat payload from the start of the moof.
        let payload_origin = fragment.moof_size + mdat_header_size;
        let mut cursor = 0u64;

        for run in &fragment.runs {
            if let Some(offset) = run.data_offset {
                if tfhd.base_data_offset.is_some() {
                    tracing::debug!("Ignoring explicit base data offset, using moof start");
                }
                cursor = (offset as i64 - payload_origin as i64).max(0) as u64;
            }
            for entry in &run.entries {
                let duration = sample_duration(entry, tfhd)?;
                let size = sample_size(entry, tfhd)? as u64;
                let end = cursor + size;
                if end > payload.len() as u64 {
                    return Err(Error::truncated(end, payload.len() as u64));
                }
                let data = payload.slice(cursor as usize..end as usize);
                cursor = end;

                // Both edges come from integer ticks so that back-to-back
                // samples share the exact same boundary.
                let presentation = decode_time as i64 + entry.composition_time_offset.unwrap_or(0) as i64;
                let start = presentation.max(0) as f64 / timescale;
                let end = (presentation + duration as i64).max(0) as f64 / timescale;
                decode_time += duration as u64;
                sink(ParserEvent::Sample(ParsedSample { start, end, data }))?;
            }
        }
        self.next_decode_time = decode_time;
        Ok(())
    }
}

impl Default for Fmp4WebVttParser {
    fn default() -> Self {
        Self::new()
    }
}

fn read_fragment(moof: IsoBox, moof_size: u64) -> Result<Fragment> {
    let container = moof
        .into_payload::<ContainerBox>()
        .map_err(|_| Error::parse("moof is not a container"))?;
    let traf = container
        .children
        .into_iter()
        .find(|c| c.box_type() == BoxType::TRAF)
        .ok_or_else(|| Error::parse("moof has no track fragment"))?
        .into_payload::<ContainerBox>()
        .map_err(|_| Error::parse("traf is not a container"))?;

    let mut tfhd = None;
    let mut base_decode_time = None;
    let mut runs = Vec::new();
    for child in traf.children {
        match child.box_type() {
            BoxType::TFHD => tfhd = child.into_payload::<TfhdBox>().ok(),
            BoxType::TFDT => {
                base_decode_time = child
                    .into_payload::<TfdtBox>()
                    .ok()
                    .map(|tfdt| tfdt.base_media_decode_time)
            }
            BoxType::TRUN => runs.extend(child.into_payload::<TrunBox>().ok()),
            _ => {}
        }
    }

    Ok(Fragment {
        moof_size,
        tfhd: tfhd.ok_or_else(|| Error::parse("track fragment has no header"))?,
        base_decode_time,
        runs,
    })
}

fn sample_duration(entry: &TrunEntry, tfhd: &TfhdBox) -> Result<u32> {
    entry
        .duration
        .or(tfhd.default_sample_duration)
        .ok_or_else(|| Error::parse("sample has no duration"))
}

fn sample_size(entry: &TrunEntry, tfhd: &TfhdBox) -> Result<u32> {
    entry
        .size
        .or(tfhd.default_sample_size)
        .ok_or_else(|| Error::parse("sample has no size"))
}

impl SegmentParser for Fmp4WebVttParser {
    fn parse(&mut self, data: Bytes, sink: &mut EventSink<'_>) -> Result<()> {
        self.pending.extend_from_slice(&data);
        while let Some(size) = self.next_box_size()? {
            let b = self.pending.split_to(size).freeze();
            self.handle_box(b, sink)?;
        }
        if !self.pending.is_empty() {
            tracing::trace!("{} bytes buffered for the next chunk", self.pending.len());
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.fragment = None;
        self.segment = Segment::None;
    }

    fn handle_command(&mut self, command: ParserCommand) -> Result<()> {
        self.playing = command == ParserCommand::Play;
        tracing::debug!("Parser command {:?}", command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vttsource_media::boxes::MfhdBox;
    use vttsource_media::webvtt::{
        create_description, write_media_segment, MediaTrack, MemoryContainer, SegmentSample,
        TextDescription, Timestamp, WebVttCue, WebVttSample,
    };

    fn init_segment() -> Bytes {
        let mut movie = MemoryContainer::new(true);
        movie.add_track(MediaTrack::text(1, 1000));
        let desc = TextDescription {
            config: "WEBVTT".to_string(),
            ..TextDescription::default()
        };
        create_description(&mut movie, 1, &desc).unwrap();
        movie.into_init_segment().unwrap()
    }

    fn collect(parser: &mut Fmp4WebVttParser, data: Bytes) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        parser
            .parse(data, &mut |e| {
                events.push(e);
                Ok(())
            })
            .unwrap();
        events
    }

    #[test]
    fn test_init_segment() {
        let mut parser = Fmp4WebVttParser::new();
        let events = collect(&mut parser, init_segment());
        assert_eq!(
            events,
            vec![
                ParserEvent::InitSegmentStart,
                ParserEvent::InitSegment(InitInfo {
                    timescale: 1000,
                    config: "WEBVTT".to_string()
                })
            ]
        );
        assert_eq!(parser.timescale(), Some(1000));
    }

    #[test]
    fn test_partial_chunks_are_buffered() {
        let init = init_segment();
        let mut parser = Fmp4WebVttParser::new();
        let first = collect(&mut parser, init.slice(..10));
        assert!(first.is_empty());
        let rest = collect(&mut parser, init.slice(10..));
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_init_without_webvtt_track() {
        let mut movie = MemoryContainer::new(true);
        movie.add_track(MediaTrack::text(1, 1000));
        let init = movie.into_init_segment().unwrap();
        let mut parser = Fmp4WebVttParser::new();
        let err = parser.parse(init, &mut |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), vttsource_common::ErrorKind::Parse);
    }

    #[test]
    fn test_reset_drops_buffered_input() {
        let init = init_segment();
        let mut parser = Fmp4WebVttParser::new();
        collect(&mut parser, init.slice(..10));
        parser.reset();
        let events = collect(&mut parser, init);
        assert_eq!(events.len(), 2);
        assert_eq!(parser.timescale(), Some(1000));
    }

    #[test]
    fn test_unsized_box_rejected() {
        let mut parser = Fmp4WebVttParser::new();
        let data = Bytes::from_static(&[0, 0, 0, 0, b'm', b'd', b'a', b't']);
        let err = parser.parse(data, &mut |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), vttsource_common::ErrorKind::Parse);
    }

    #[test]
    fn test_back_to_back_samples_share_edges() {
        let mut parser = Fmp4WebVttParser::new();
        collect(&mut parser, init_segment());
        let sample = |text: &str| SegmentSample {
            duration: 100,
            sample: WebVttSample::new(vec![WebVttCue::new(text, Timestamp::ZERO, Timestamp::ZERO)]),
        };
        let segment = write_media_segment(1, 700, &[sample("a"), sample("b")]).unwrap();
        let samples: Vec<ParsedSample> = collect(&mut parser, segment)
            .into_iter()
            .filter_map(|e| match e {
                ParserEvent::Sample(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].start, 0.7);
        assert_eq!(samples[0].end, samples[1].start);
        assert_eq!(samples[1].end, 0.9);
    }

    #[test]
    fn test_deeply_nested_boxes_rejected() {
        let levels = 10_000;
        let mut data = Vec::with_capacity(levels * 8);
        for level in 0..levels {
            data.extend_from_slice(&(((levels - level) * 8) as u32).to_be_bytes());
            data.extend_from_slice(b"moov");
        }
        let mut parser = Fmp4WebVttParser::new();
        let err = parser.parse(Bytes::from(data), &mut |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), vttsource_common::ErrorKind::Parse);
    }

    #[test]
    fn test_fieldless_run_with_huge_count() {
        let mut parser = Fmp4WebVttParser::new();
        collect(&mut parser, init_segment());

        let trun = Bytes::from_static(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        let mut moof = IsoBox::new(
            BoxType::MOOF,
            ContainerBox::with_children(vec![
                IsoBox::new(BoxType::MFHD, MfhdBox::new(1)),
                IsoBox::new(
                    BoxType::TRAF,
                    ContainerBox::with_children(vec![
                        IsoBox::new(BoxType::TFHD, TfhdBox::new(1)),
                        IsoBox::new(BoxType::TRUN, RawBox::new(trun)),
                    ]),
                ),
            ]),
        );
        let mut mdat = IsoBox::new(BoxType::MDAT, RawBox::new(Bytes::new()));
        let mut data = moof.to_bytes().unwrap().to_vec();
        data.extend_from_slice(&mdat.to_bytes().unwrap());

        let events = collect(&mut parser, Bytes::from(data));
        assert!(!events.iter().any(|e| matches!(e, ParserEvent::Sample(_))));
        assert_eq!(events.last(), Some(&ParserEvent::MediaSegmentEnd));
    }

    #[test]
    fn test_commands() {
        let mut parser = Fmp4WebVttParser::new();
        parser.handle_command(ParserCommand::Play).unwrap();
        assert!(parser.is_playing());
        parser.handle_command(ParserCommand::Stop).unwrap();
        assert!(!parser.is_playing());
    }
}
