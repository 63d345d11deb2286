//! WebVTT in ISO BMFF: cue boxes, the `wvtt` sample entry, the cue model and
//! sample encode/decode, and single-track segment writing.

mod boxes;
mod cue;
mod decoder_config;
mod description;
mod sample;
mod segment;

pub use boxes::{CueBox, EmptyCueBox, StringBox, WebVttSampleEntry};
pub use cue::{CueProperty, SplitOrigin, Timestamp, WebVttCue};
pub use decoder_config::{decoder_config, DecoderConfig, OBJECT_TYPE_TEXT, STREAM_TYPE_TEXT};
pub use description::{
    create_description, mp4_time_now, update_description, ContainerStore, DataReference,
    MediaTrack, MemoryContainer, TextDescription, MP4_EPOCH_OFFSET,
};
pub use sample::{IsoSample, WebVttSample};
pub use segment::{write_init_segment, write_media_segment, SegmentSample, TEXT_TRACK_ID};
