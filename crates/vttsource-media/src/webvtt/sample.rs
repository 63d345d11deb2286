//! WebVTT sample encode/decode.

use super::boxes::{CueBox, EmptyCueBox};
use super::cue::{Timestamp, WebVttCue};
use crate::boxes::{default_registry, BoxType, IsoBox};
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use vttsource_common::Result;

/// Cues sharing one decode time. An empty sample means "no active cue".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebVttSample {
    pub cues: Vec<WebVttCue>,
}

/// Encoded sample bytes as stored in a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoSample {
    pub data: Bytes,
    /// Random access point. Always set for WebVTT samples.
    pub is_rap: bool,
}

impl WebVttSample {
    pub fn new(cues: Vec<WebVttCue>) -> Self {
        Self { cues }
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Serialize the cues as consecutive `vtcu` boxes, or one `vtte` when
    /// there are none.
    pub fn encode(&self) -> Result<IsoSample> {
        let mut buf = BytesMut::new();
        if self.cues.is_empty() {
            let mut marker = IsoBox::new(BoxType::VTTE, EmptyCueBox::default());
            marker.compute_size()?;
            marker.write(&mut buf)?;
        }
        for cue in &self.cues {
            let mut cue_box = IsoBox::new(BoxType::VTCU, cue.to_cue_box());
            cue_box.compute_size()?;
            cue_box.write(&mut buf)?;
        }
        Ok(IsoSample {
            data: buf.freeze(),
            is_rap: true,
        })
    }

    /// Parse sample bytes. Zero-length input is an empty sample; boxes other
    /// than `vtcu` and `vtte` are skipped.
    pub fn decode(data: impl Into<Bytes>) -> Result<Self> {
        let mut buf: Bytes = data.into();
        let mut sample = Self::default();
        while buf.has_remaining() {
            let b = IsoBox::read(&mut buf, default_registry())?;
            match b.box_type() {
                BoxType::VTTE => {}
                BoxType::VTCU => match b.payload::<CueBox>() {
                    Some(cue) => sample.cues.push(WebVttCue::from_cue_box(cue)),
                    None => tracing::warn!("Skipping cue box that did not decode as a cue"),
                },
                other => tracing::debug!("Skipping '{}' box in WebVTT sample", other),
            }
        }
        Ok(sample)
    }

    /// Decode and stamp every cue with the sample's extent.
    pub fn decode_timed(data: impl Into<Bytes>, start: Timestamp, end: Timestamp) -> Result<Self> {
        let mut sample = Self::decode(data)?;
        for cue in &mut sample.cues {
            cue.start = start;
            cue.end = end;
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sample_is_one_marker() {
        let encoded = WebVttSample::default().encode().unwrap();
        assert!(encoded.is_rap);
        assert_eq!(encoded.data.as_ref(), &[0, 0, 0, 8, b'v', b't', b't', b'e']);

        let decoded = WebVttSample::decode(encoded.data.clone()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.encode().unwrap().data, encoded.data);
    }

    #[test]
    fn test_zero_length_input_is_empty_sample() {
        assert!(WebVttSample::decode(Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_cues_keep_order() {
        let mut second = WebVttCue::new("second", Timestamp::ZERO, Timestamp::ZERO);
        second.id = Some("2".to_string());
        let sample = WebVttSample::new(vec![
            WebVttCue::new("first", Timestamp::ZERO, Timestamp::ZERO),
            second,
        ]);
        let encoded = sample.encode().unwrap();
        let decoded = WebVttSample::decode(encoded.data).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_unknown_boxes_skipped() {
        let data: &[u8] = &[
            0, 0, 0, 9, b'f', b'r', b'e', b'e', 0, //
            0, 0, 0, 17, b'v', b't', b'c', b'u', //
            0, 0, 0, 9, b'p', b'a', b'y', b'l', b'x',
        ];
        let sample = WebVttSample::decode(Bytes::copy_from_slice(data)).unwrap();
        assert_eq!(sample.cues.len(), 1);
        assert_eq!(sample.cues[0].text(), "x");
    }

    #[test]
    fn test_truncated_sample_fails() {
        let data: &[u8] = &[0, 0, 0, 30, b'v', b't', b'c', b'u'];
        assert!(WebVttSample::decode(Bytes::copy_from_slice(data)).is_err());
    }

    #[test]
    fn test_decode_timed() {
        let encoded = WebVttSample::new(vec![WebVttCue::new("a", Timestamp::ZERO, Timestamp::ZERO)])
            .encode()
            .unwrap();
        let sample =
            WebVttSample::decode_timed(encoded.data, Timestamp::from_millis(1000), Timestamp::from_millis(3000))
                .unwrap();
        assert_eq!(sample.cues[0].start, Timestamp::from_millis(1000));
        assert_eq!(sample.cues[0].end, Timestamp::from_millis(3000));
    }
}
