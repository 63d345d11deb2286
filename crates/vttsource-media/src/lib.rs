//! Box codec and WebVTT track support for vttsource.
//!
//! [`boxes`] holds the generic length/type-prefixed tree engine; [`webvtt`]
//! builds the timed-text boxes, cues and samples on top of it.
//!
//! ```
//! use vttsource_media::webvtt::{Timestamp, WebVttCue, WebVttSample};
//!
//! let sample = WebVttSample::new(vec![WebVttCue::new(
//!     "Hello",
//!     Timestamp::from_millis(0),
//!     Timestamp::from_millis(2000),
//! )]);
//! let encoded = sample.encode().unwrap();
//! let decoded = WebVttSample::decode(encoded.data).unwrap();
//! assert_eq!(decoded.cues[0].text(), "Hello");
//! ```

pub mod boxes;
pub mod webvtt;

pub use boxes::{BoxRegistry, BoxType, IsoBox};
pub use vttsource_common::{Error, Result};
