//! Minimal decoder configuration for a WebVTT track, for systems that carry
//! text streams through an elementary-stream descriptor.

use super::description::MediaTrack;
use bitstream_io::{BigEndian, BitWrite, BitWriter};
use vttsource_common::{Error, Result};

/// Stream type of text streams.
pub const STREAM_TYPE_TEXT: u8 = 0x0D;

/// Object type indication of timed text.
pub const OBJECT_TYPE_TEXT: u8 = 0x08;

/// Decoder configuration: stream type, object type and the
/// decoder-specific info blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub stream_type: u8,
    pub object_type_indication: u8,
    pub specific_info: Vec<u8>,
}

/// Build the decoder configuration for `track`.
///
/// `movie_has_visual` adds the visual layout fields. Fails when the track
/// has no sample description.
pub fn decoder_config(track: &MediaTrack, movie_has_visual: bool) -> Result<DecoderConfig> {
    let count = track.sample_descriptions.entries.len();
    if count == 0 {
        return Err(Error::parameter(format!(
            "track {} has no sample description",
            track.track_id
        )));
    }
    let count = u8::try_from(count)
        .map_err(|_| Error::parameter("too many sample descriptions for decoder config"))?;

    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    // base format, extended format, profile level
    w.write(8, 0x10u8)?;
    w.write(8, 0x10u8)?;
    w.write(8, 0x10u8)?;
    w.write(24, track.media_header.timescale & 0x00FF_FFFF)?;
    w.write_bit(false)?; // no alternate formats
    w.write(2, 2u8)?; // sample descriptions out of band only
    w.write_bit(true)?; // sample descriptions follow
    w.write_bit(movie_has_visual)?;
    w.write(3, 0u8)?;
    w.write(8, track.layer as u8)?;
    w.write(16, (track.width >> 16) as u16)?;
    w.write(16, (track.height >> 16) as u16)?;
    w.write(8, count)?;
    if movie_has_visual {
        w.write(16, 0u16)?;
        w.write(16, 0u16)?;
        w.write(16, (track.translation.0 >> 16) as u16)?;
        w.write(16, (track.translation.1 >> 16) as u16)?;
    }
    w.byte_align()?;

    Ok(DecoderConfig {
        stream_type: STREAM_TYPE_TEXT,
        object_type_indication: OBJECT_TYPE_TEXT,
        specific_info: w.into_writer(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{BoxType, IsoBox};
    use crate::webvtt::WebVttSampleEntry;

    fn track_with_entry() -> MediaTrack {
        let mut track = MediaTrack::text(1, 1000);
        track
            .sample_descriptions
            .entries
            .push(IsoBox::new(BoxType::WVTT, WebVttSampleEntry::new("WEBVTT")));
        track.width = 640 << 16;
        track.height = 360 << 16;
        track
    }

    #[test]
    fn test_blob_without_visual() {
        let config = decoder_config(&track_with_entry(), false).unwrap();
        assert_eq!(config.stream_type, STREAM_TYPE_TEXT);
        assert_eq!(config.object_type_indication, 0x08);
        assert_eq!(
            config.specific_info,
            vec![
                0x10, 0x10, 0x10, // formats
                0x00, 0x03, 0xE8, // timescale 1000
                0b0101_0000, // flags
                0x00, // layer
                0x02, 0x80, // width 640
                0x01, 0x68, // height 360
                0x01, // count
            ]
        );
    }

    #[test]
    fn test_blob_with_visual_adds_translation() {
        let mut track = track_with_entry();
        track.translation = (10 << 16, 20 << 16);
        let config = decoder_config(&track, true).unwrap();
        let info = &config.specific_info;
        assert_eq!(info.len(), 13 + 8);
        assert_eq!(info[6], 0b0101_1000);
        assert_eq!(&info[13..], &[0, 0, 0, 0, 0, 10, 0, 20]);
    }

    #[test]
    fn test_requires_a_description() {
        let track = MediaTrack::text(1, 1000);
        assert!(decoder_config(&track, false).is_err());
    }
}
