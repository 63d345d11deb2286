//! Parser boundary: segment parsers turn appended bytes into init
//! information and timed samples.

mod fmp4;

pub use fmp4::Fmp4WebVttParser;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use vttsource_common::{Error, Result};

/// Track information carried by an initialization segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitInfo {
    /// Media timescale, ticks per second.
    pub timescale: u32,
    /// `vttC` cue template of the sample entry.
    pub config: String,
}

/// One decoded sample, timed in seconds before any timestamp offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    pub start: f64,
    pub end: f64,
    /// Encoded WebVTT sample payload.
    pub data: Bytes,
}

/// Output of a parser, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    InitSegmentStart,
    InitSegment(InitInfo),
    MediaSegmentStart,
    Sample(ParsedSample),
    MediaSegmentEnd,
}

/// Commands forwarded from the container layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserCommand {
    Play,
    Stop,
}

/// Receives parser output; an error stops the parse.
pub type EventSink<'a> = dyn FnMut(ParserEvent) -> Result<()> + 'a;

/// A segment parser for one MIME type.
pub trait SegmentParser: Send {
    /// Consume `data`. Incomplete trailing input is kept for the next call.
    fn parse(&mut self, data: Bytes, sink: &mut EventSink<'_>) -> Result<()>;

    /// Drop any partially parsed segment and buffered input.
    fn reset(&mut self);

    fn handle_command(&mut self, command: ParserCommand) -> Result<()> {
        tracing::debug!("Parser ignores {:?}", command);
        Ok(())
    }
}

type Constructor = Arc<dyn Fn() -> Box<dyn SegmentParser> + Send + Sync>;

#[derive(Clone)]
struct ParserEntry {
    /// Codec that must be listed in the `codecs` parameter, if any.
    required_codec: Option<&'static str>,
    constructor: Constructor,
}

/// MIME type to parser lookup.
#[derive(Clone)]
pub struct ParserFactory {
    entries: HashMap<String, Vec<ParserEntry>>,
}

impl ParserFactory {
    /// Factory with no parsers.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Factory with the fragmented MP4 WebVTT parser.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register("text/mp4", None, || Box::new(Fmp4WebVttParser::new()));
        factory.register("application/mp4", Some("wvtt"), || {
            Box::new(Fmp4WebVttParser::new())
        });
        factory
    }

    /// Register a parser for a MIME essence (`type/subtype`), optionally
    /// requiring a codec in the `codecs` parameter.
    pub fn register<F>(&mut self, essence: &str, required_codec: Option<&'static str>, constructor: F)
    where
        F: Fn() -> Box<dyn SegmentParser> + Send + Sync + 'static,
    {
        self.entries
            .entry(essence.to_ascii_lowercase())
            .or_default()
            .push(ParserEntry {
                required_codec,
                constructor: Arc::new(constructor),
            });
    }

    fn lookup(&self, mime: &str) -> Option<&ParserEntry> {
        let (essence, codecs) = parse_mime(mime)?;
        self.entries.get(&essence)?.iter().find(|entry| {
            match entry.required_codec {
                None => codecs.iter().all(|c| c == "wvtt"),
                Some(required) => codecs.iter().any(|c| c == required),
            }
        })
    }

    pub fn is_type_supported(&self, mime: &str) -> bool {
        self.lookup(mime).is_some()
    }

    /// Instantiate the parser for `mime`.
    pub fn create(&self, mime: &str) -> Result<Box<dyn SegmentParser>> {
        match self.lookup(mime) {
            Some(entry) => Ok((entry.constructor)()),
            None => Err(Error::not_supported(format!("no parser for '{}'", mime))),
        }
    }
}

impl Default for ParserFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParserFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserFactory")
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Split `type/subtype; codecs="a, b"` into a lowercase essence and codec list.
fn parse_mime(mime: &str) -> Option<(String, Vec<String>)> {
    let mut parts = mime.split(';');
    let essence = parts.next()?.trim().to_ascii_lowercase();
    if !essence.contains('/') {
        return None;
    }
    let mut codecs = Vec::new();
    for param in parts {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("codecs") {
            codecs.extend(
                value
                    .trim()
                    .trim_matches('"')
                    .split(',')
                    .map(|c| c.trim().to_ascii_lowercase())
                    .filter(|c| !c.is_empty()),
            );
        }
    }
    Some((essence, codecs))
}
