//! Cue model: timestamps, cues, streamed property accumulation and
//! boundary splitting.

use super::boxes::{CueBox, StringBox};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use vttsource_common::{Error, Result};

/// Media time in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Round seconds to the nearest millisecond. Negative values clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return Self::ZERO;
        }
        Self((secs * 1000.0).round() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    /// `hh:mm:ss.mmm`, as written in WebVTT files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0 % 1000;
        let total_secs = self.0 / 1000;
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            total_secs / 3600,
            (total_secs / 60) % 60,
            total_secs % 60,
            ms
        )
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    /// Accepts `hh:mm:ss.mmm` and `mm:ss.mmm`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::parameter(format!("invalid timestamp '{}'", s));

        let (clock, frac) = s.split_once('.').ok_or_else(invalid)?;
        if frac.len() != 3 {
            return Err(invalid());
        }
        let ms: u64 = frac.parse().map_err(|_| invalid())?;

        let parts: Vec<&str> = clock.split(':').collect();
        let (h, m, sec) = match parts.as_slice() {
            [h, m, sec] => (h.parse::<u64>(), m.parse::<u64>(), sec.parse::<u64>()),
            [m, sec] => (Ok(0), m.parse::<u64>(), sec.parse::<u64>()),
            _ => return Err(invalid()),
        };
        let (h, m, sec) = match (h, m, sec) {
            (Ok(h), Ok(m), Ok(sec)) if m < 60 && sec < 60 => (h, m, sec),
            _ => return Err(invalid()),
        };
        Ok(Self(((h * 60 + m) * 60 + sec) * 1000 + ms))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Field of a cue that can be filled in fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueProperty {
    Id,
    Settings,
    Text,
    Time,
}

/// Extent of a cue before it was first split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOrigin {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// One timed text entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebVttCue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Cue current time, carried through from `ctim`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub start: Timestamp,
    #[serde(default)]
    pub end: Timestamp,
    /// Set once the cue has been split; holds its pre-split extent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitOrigin>,
}

impl WebVttCue {
    pub fn new(text: impl Into<String>, start: Timestamp, end: Timestamp) -> Self {
        Self {
            text: Some(text.into()),
            start,
            end,
            ..Self::default()
        }
    }

    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Append a UTF-8 fragment to one of the cue's text fields.
    ///
    /// An empty fragment leaves the field untouched, including when it is unset.
    pub fn add_property(&mut self, property: CueProperty, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let field = match property {
            CueProperty::Id => &mut self.id,
            CueProperty::Settings => &mut self.settings,
            CueProperty::Text => &mut self.text,
            CueProperty::Time => &mut self.time,
        };
        field.get_or_insert_with(String::new).push_str(fragment);
    }

    /// Split at `t`, keeping `[start, t)` here and returning `[t, end)`.
    ///
    /// Fails without touching the cue unless `start < t < end`.
    pub fn split_at(&mut self, t: Timestamp) -> Result<WebVttCue> {
        if !(self.start < t && t < self.end) {
            return Err(Error::parameter(format!(
                "split point {} outside cue [{}, {})",
                t, self.start, self.end
            )));
        }

        let origin = *self.split.get_or_insert(SplitOrigin {
            start: self.start,
            end: self.end,
        });
        let tail = WebVttCue {
            start: t,
            split: Some(origin),
            ..self.clone()
        };
        self.end = t;
        Ok(tail)
    }

    /// Build the `vtcu` payload for this cue. Timing and `time` are not carried.
    pub fn to_cue_box(&self) -> CueBox {
        CueBox {
            id: self.id.as_deref().map(StringBox::from),
            settings: self.settings.as_deref().map(StringBox::from),
            payload: self.text.as_deref().map(StringBox::from),
            ..CueBox::default()
        }
    }

    /// Read the text fields of a decoded `vtcu`. Timing is left at zero.
    pub fn from_cue_box(cue: &CueBox) -> Self {
        Self {
            id: cue.id.as_ref().map(StringBox::to_string_lossy),
            settings: cue.settings.as_ref().map(StringBox::to_string_lossy),
            text: cue.payload.as_ref().map(StringBox::to_string_lossy),
            time: cue.time.as_ref().map(StringBox::to_string_lossy),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    #[test]
    fn test_timestamp_display_and_parse() {
        let t = ms(3_723_004);
        assert_eq!(t.to_string(), "01:02:03.004");
        assert_eq!("01:02:03.004".parse::<Timestamp>().unwrap(), t);
        assert_eq!("02:03.004".parse::<Timestamp>().unwrap(), ms(123_004));
        assert!("1:70:00.000".parse::<Timestamp>().is_err());
        assert!("00:00:01".parse::<Timestamp>().is_err());
        assert!("00:00:01.5".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_timestamp_from_secs() {
        assert_eq!(Timestamp::from_secs_f64(1.2346), ms(1235));
        assert_eq!(Timestamp::from_secs_f64(-3.0), Timestamp::ZERO);
        assert_eq!(Timestamp::from_secs_f64(f64::NAN), Timestamp::ZERO);
        assert_eq!(ms(2500).as_secs_f64(), 2.5);
    }

    #[test]
    fn test_add_property_concatenates() {
        let mut cue = WebVttCue::default();
        cue.add_property(CueProperty::Text, "Hel");
        cue.add_property(CueProperty::Text, "lo");
        cue.add_property(CueProperty::Id, "");
        cue.add_property(CueProperty::Time, "00:00:01.000");
        assert_eq!(cue.text.as_deref(), Some("Hello"));
        assert!(cue.id.is_none());
        assert_eq!(cue.time.as_deref(), Some("00:00:01.000"));
    }

    #[test]
    fn test_split_at() {
        let mut cue = WebVttCue {
            id: Some("a".to_string()),
            settings: Some("line:0".to_string()),
            ..WebVttCue::new("Hello", ms(0), ms(10))
        };
        let tail = cue.split_at(ms(4)).unwrap();

        assert_eq!((cue.start, cue.end), (ms(0), ms(4)));
        assert_eq!((tail.start, tail.end), (ms(4), ms(10)));
        let origin = SplitOrigin {
            start: ms(0),
            end: ms(10),
        };
        assert_eq!(cue.split, Some(origin));
        assert_eq!(tail.split, Some(origin));
        assert_eq!(cue.id, tail.id);
        assert_eq!(cue.settings, tail.settings);
        assert_eq!(cue.text, tail.text);
    }

    #[test]
    fn test_split_keeps_first_origin() {
        let mut cue = WebVttCue::new("x", ms(0), ms(10));
        let mut tail = cue.split_at(ms(4)).unwrap();
        let last = tail.split_at(ms(7)).unwrap();
        assert_eq!((tail.start, tail.end), (ms(4), ms(7)));
        assert_eq!((last.start, last.end), (ms(7), ms(10)));
        assert_eq!(last.split.unwrap().start, ms(0));
        assert_eq!(last.split.unwrap().end, ms(10));
    }

    #[test]
    fn test_split_out_of_range_fails_without_change() {
        let mut cue = WebVttCue::new("x", ms(5), ms(10));
        let before = cue.clone();
        for t in [0, 5, 10, 12] {
            let err = cue.split_at(ms(t)).unwrap_err();
            assert_eq!(err.kind(), vttsource_common::ErrorKind::Parameter);
        }
        assert_eq!(cue, before);
    }

    #[test]
    fn test_cue_json_shape() {
        let cue = WebVttCue::new("Hi", ms(1000), ms(2500));
        let json = serde_json::to_string(&cue).unwrap();
        assert_eq!(json, r#"{"text":"Hi","start":"00:00:01.000","end":"00:00:02.500"}"#);
        let back: WebVttCue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cue);
    }
}
