//! Vttsource-MSE: Media Source Extensions style buffering for WebVTT tracks.
//!
//! - **Media source**: ready state, duration and the set of source buffers
//! - **Source buffer**: append / abort / remove state machine with buffered
//!   time ranges, timestamp offset, append window and a capacity gate
//! - **Parsers**: MIME-keyed parser factory and a fragmented MP4 WebVTT parser
//! - **Events**: broadcast bus for source and buffer events
//!
//! # Examples
//!
//! ```
//! use vttsource_media::webvtt::{
//!     write_init_segment, write_media_segment, SegmentSample, Timestamp, WebVttCue, WebVttSample,
//! };
//! use vttsource_mse::MediaSource;
//!
//! # fn main() -> vttsource_common::Result<()> {
//! let mut source = MediaSource::new();
//! source.attach()?;
//! let buffer = source.add_source_buffer("text/mp4; codecs=\"wvtt\"")?;
//!
//! source.append(buffer, write_init_segment(1000, "WEBVTT")?)?;
//! let cue = WebVttCue::new("Hello", Timestamp::ZERO, Timestamp::ZERO);
//! let segment = write_media_segment(
//!     1,
//!     0,
//!     &[SegmentSample { duration: 2000, sample: WebVttSample::new(vec![cue]) }],
//! )?;
//! source.append(buffer, segment)?;
//!
//! let buffered = source.source_buffer(buffer).unwrap().buffered();
//! assert_eq!(buffered.as_slice(), &[(0.0, 2.0)]);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod media_source;
pub mod options;
pub mod parser;
pub mod source_buffer;
pub mod time_ranges;

pub use events::{Event, EventBus, EventPayload};
pub use media_source::{Duration, MediaSource, ReadyState};
pub use options::SourceBufferOptions;
pub use parser::{
    EventSink, Fmp4WebVttParser, InitInfo, ParsedSample, ParserCommand, ParserEvent,
    ParserFactory, SegmentParser,
};
pub use source_buffer::{AbortMode, AppendState, BufferedSample, Operation, SourceBuffer};
pub use time_ranges::TimeRanges;
pub use vttsource_common::{Error, Result};
