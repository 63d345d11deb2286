//! Fragmented MP4 segment writing for a single WebVTT track.
//!
//! Segments produced here are what the MSE layer's parser consumes:
//! `ftyp` + `moov` for initialization, `moof` + `mdat` for media.

use super::description::{create_description, MediaTrack, MemoryContainer, TextDescription};
use super::sample::WebVttSample;
use crate::boxes::{
    BoxHeader, BoxType, ContainerBox, IsoBox, MfhdBox, RawBox, TfdtBox, TfhdBox, TrunBox,
    TrunEntry,
};
use bytes::{Bytes, BytesMut};
use vttsource_common::Result;

/// Track ID used for single-track text segments.
pub const TEXT_TRACK_ID: u32 = 1;

/// One sample of a media segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSample {
    /// Duration in timescale units.
    pub duration: u32,
    pub sample: WebVttSample,
}

/// Initialization segment with one text track carrying a `wvtt` entry.
pub fn write_init_segment(timescale: u32, config: &str) -> Result<Bytes> {
    let mut movie = MemoryContainer::new(true);
    let track = movie.add_track(MediaTrack::text(TEXT_TRACK_ID, timescale));
    create_description(
        &mut movie,
        track,
        &TextDescription {
            config: config.to_string(),
            ..TextDescription::default()
        },
    )?;
    movie.into_init_segment()
}

fn build_moof(sequence_number: u32, decode_time: u64, entries: &[TrunEntry], data_offset: i32) -> IsoBox {
    let trun = TrunBox {
        version: 0,
        data_offset: Some(data_offset),
        first_sample_flags: None,
        entries: entries.to_vec(),
    };
    let traf = ContainerBox::with_children(vec![
        IsoBox::new(BoxType::TFHD, TfhdBox::new(TEXT_TRACK_ID)),
        IsoBox::new(BoxType::TFDT, TfdtBox::new(decode_time)),
        IsoBox::new(BoxType::TRUN, trun),
    ]);
    IsoBox::new(
        BoxType::MOOF,
        ContainerBox::with_children(vec![
            IsoBox::new(BoxType::MFHD, MfhdBox::new(sequence_number)),
            IsoBox::new(BoxType::TRAF, traf),
        ]),
    )
}

/// Media segment: one `moof` describing `samples`, followed by their `mdat`.
///
/// `decode_time` is the base media decode time in timescale units. The
/// `trun` data offset is relative to the start of the `moof`.
pub fn write_media_segment(
    sequence_number: u32,
    decode_time: u64,
    samples: &[SegmentSample],
) -> Result<Bytes> {
    let mut data = BytesMut::new();
    let mut entries = Vec::with_capacity(samples.len());
    for s in samples {
        let encoded = s.sample.encode()?;
        entries.push(TrunEntry {
            duration: Some(s.duration),
            size: Some(encoded.data.len() as u32),
            flags: None,
            composition_time_offset: None,
        });
        data.extend_from_slice(&encoded.data);
    }

    // The data offset field has a fixed width, so the size is known up front.
    let moof_size = build_moof(sequence_number, decode_time, &entries, 0).compute_size()?;
    let mut mdat = IsoBox::new(BoxType::MDAT, RawBox::new(data.freeze()));
    let mdat_size = mdat.compute_size()?;
    let data_offset = moof_size + BoxHeader::header_size_for(mdat_size) as u64;

    let mut moof = build_moof(sequence_number, decode_time, &entries, data_offset as i32);
    moof.compute_size()?;

    let mut buf = BytesMut::with_capacity((moof_size + mdat_size) as usize);
    moof.write(&mut buf)?;
    mdat.write(&mut buf)?;
    Ok(buf.freeze())
}
