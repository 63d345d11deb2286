//! Type code to codec dispatch.
//!
//! The registry is open: callers can register additional box kinds or
//! override the defaults. Anything not registered parses as [`RawBox`].

use super::{
    BoxPayload, BoxType, ContainerBox, HdlrBox, IsoBox, MdhdBox, MfhdBox, RawBox,
    SampleDescriptionBox, TfdtBox, TfhdBox, TrunBox,
};
use crate::webvtt::{CueBox, EmptyCueBox, StringBox, WebVttSampleEntry};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;
use vttsource_common::{Error, Result};

/// Parse a payload into a type-specific node.
pub type ParseFn = fn(BoxType, Bytes, &ReadContext<'_>) -> Result<Box<dyn BoxPayload>>;

/// Allocate a zero-initialized payload.
pub type NewFn = fn(BoxType) -> Box<dyn BoxPayload>;

/// Codec entry for one box type.
#[derive(Clone, Copy)]
pub struct BoxKind {
    /// Name used in diagnostics.
    pub name: &'static str,
    pub new: NewFn,
    pub parse: ParseFn,
}

impl std::fmt::Debug for BoxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxKind").field("name", &self.name).finish()
    }
}

impl BoxKind {
    pub const fn new(name: &'static str, new: NewFn, parse: ParseFn) -> Self {
        Self { name, new, parse }
    }
}

/// Box type registry.
#[derive(Debug, Clone)]
pub struct BoxRegistry {
    kinds: HashMap<BoxType, BoxKind>,
}

fn new_default<T: BoxPayload + Default>(_: BoxType) -> Box<dyn BoxPayload> {
    Box::<T>::default()
}

impl BoxRegistry {
    /// Registry with no entries: every box parses as raw bytes.
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Registry with the WebVTT boxes, the movie/fragment containers and
    /// the fragment headers needed to read a timed-text track.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        let container = BoxKind::new("ContainerBox", new_default::<ContainerBox>, ContainerBox::parse);
        for box_type in [
            BoxType::MOOV,
            BoxType::TRAK,
            BoxType::MDIA,
            BoxType::MINF,
            BoxType::DINF,
            BoxType::STBL,
            BoxType::MVEX,
            BoxType::EDTS,
            BoxType::UDTA,
            BoxType::MOOF,
            BoxType::TRAF,
        ] {
            registry.register(box_type, container);
        }

        registry.register(
            BoxType::STSD,
            BoxKind::new(
                "SampleDescriptionBox",
                new_default::<SampleDescriptionBox>,
                SampleDescriptionBox::parse,
            ),
        );
        registry.register(
            BoxType::MDHD,
            BoxKind::new("MediaHeaderBox", new_default::<MdhdBox>, MdhdBox::parse),
        );
        registry.register(
            BoxType::HDLR,
            BoxKind::new("HandlerBox", new_default::<HdlrBox>, HdlrBox::parse),
        );
        registry.register(
            BoxType::MFHD,
            BoxKind::new("MovieFragmentHeaderBox", new_default::<MfhdBox>, MfhdBox::parse),
        );
        registry.register(
            BoxType::TFHD,
            BoxKind::new("TrackFragmentHeaderBox", new_default::<TfhdBox>, TfhdBox::parse),
        );
        registry.register(
            BoxType::TFDT,
            BoxKind::new("TrackFragmentDecodeTimeBox", new_default::<TfdtBox>, TfdtBox::parse),
        );
        registry.register(
            BoxType::TRUN,
            BoxKind::new("TrackRunBox", new_default::<TrunBox>, TrunBox::parse),
        );

        let string = BoxKind::new("StringBox", new_default::<StringBox>, StringBox::parse);
        for box_type in [
            BoxType::IDEN,
            BoxType::STTG,
            BoxType::PAYL,
            BoxType::CTIM,
            BoxType::VTTC,
        ] {
            registry.register(box_type, string);
        }
        registry.register(
            BoxType::VTCU,
            BoxKind::new("WebVTTCueBox", new_default::<CueBox>, CueBox::parse),
        );
        registry.register(
            BoxType::VTTE,
            BoxKind::new("WebVTTEmptyCueBox", new_default::<EmptyCueBox>, EmptyCueBox::parse),
        );
        registry.register(
            BoxType::WVTT,
            BoxKind::new(
                "WebVTTSampleEntryBox",
                new_default::<WebVttSampleEntry>,
                WebVttSampleEntry::parse,
            ),
        );

        registry
    }

    /// Register (or replace) the codec for `box_type`, returning the previous one.
    pub fn register(&mut self, box_type: BoxType, kind: BoxKind) -> Option<BoxKind> {
        self.kinds.insert(box_type, kind)
    }

    pub fn contains(&self, box_type: BoxType) -> bool {
        self.kinds.contains_key(&box_type)
    }

    pub fn kind(&self, box_type: BoxType) -> Option<&BoxKind> {
        self.kinds.get(&box_type)
    }

    /// Allocate a zero-initialized box of the given type.
    pub fn new_box(&self, box_type: BoxType) -> IsoBox {
        let payload = match self.kinds.get(&box_type) {
            Some(kind) => (kind.new)(box_type),
            None => Box::<RawBox>::default(),
        };
        IsoBox::from_boxed(box_type, payload)
    }

    /// Parse a top-level `payload` with the codec registered for `box_type`,
    /// or keep it raw.
    pub fn parse_payload(&self, box_type: BoxType, payload: Bytes) -> Result<Box<dyn BoxPayload>> {
        ReadContext::new(self).parse_payload(box_type, payload)
    }
}

/// Registry plus the nesting depth of the box being parsed.
///
/// Container codecs hand their context to
/// [`read_box_list`](super::read_box_list), which parses the children one
/// level deeper and fails with [`Error::NestingTooDeep`] past
/// [`MAX_DEPTH`](Self::MAX_DEPTH).
#[derive(Debug, Clone, Copy)]
pub struct ReadContext<'a> {
    pub registry: &'a BoxRegistry,
    pub depth: usize,
}

impl<'a> ReadContext<'a> {
    /// Deepest nesting level accepted when reading.
    pub const MAX_DEPTH: usize = 64;

    /// Context for a top-level box.
    pub fn new(registry: &'a BoxRegistry) -> Self {
        Self { registry, depth: 0 }
    }

    /// Context for the children of the current box.
    pub fn nested(&self) -> Result<Self> {
        if self.depth >= Self::MAX_DEPTH {
            return Err(Error::NestingTooDeep {
                limit: Self::MAX_DEPTH,
            });
        }
        Ok(Self {
            registry: self.registry,
            depth: self.depth + 1,
        })
    }

    /// Parse `payload` at this depth with the codec registered for
    /// `box_type`, or keep it raw.
    pub fn parse_payload(&self, box_type: BoxType, payload: Bytes) -> Result<Box<dyn BoxPayload>> {
        match self.registry.kinds.get(&box_type) {
            Some(kind) => {
                tracing::trace!(
                    "Parsing '{}' as {} ({} bytes, depth {})",
                    box_type,
                    kind.name,
                    payload.len(),
                    self.depth
                );
                (kind.parse)(box_type, payload, self)
            }
            None => {
                tracing::debug!("Unrecognised box '{}' ({} bytes) kept raw", box_type, payload.len());
                RawBox::parse(box_type, payload, self)
            }
        }
    }
}

impl Default for BoxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared registry with the default entries.
pub fn default_registry() -> &'static BoxRegistry {
    static REGISTRY: OnceLock<BoxRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BoxRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_box_is_zero_initialized() {
        let registry = BoxRegistry::new();
        let mut cue = registry.new_box(BoxType::VTCU);
        assert_eq!(cue.size(), 0);
        let payload = cue.payload::<CueBox>().unwrap();
        assert!(payload.id.is_none() && payload.settings.is_none() && payload.payload.is_none());
        assert_eq!(cue.compute_size().unwrap(), 8);

        let unknown = registry.new_box(BoxType(*b"none"));
        assert!(unknown.payload::<RawBox>().unwrap().data.is_empty());
    }

    #[test]
    fn test_empty_registry_keeps_everything_raw() {
        let registry = BoxRegistry::empty();
        let payload = registry
            .parse_payload(BoxType::VTCU, Bytes::from_static(b"junk"))
            .unwrap();
        assert!(payload.as_any().is::<RawBox>());
    }

    #[test]
    fn test_override_registered_kind() {
        let mut registry = BoxRegistry::new();
        let previous = registry.register(
            BoxType::PAYL,
            BoxKind::new("Opaque", new_default::<RawBox>, RawBox::parse),
        );
        assert_eq!(previous.unwrap().name, "StringBox");
        let payload = registry
            .parse_payload(BoxType::PAYL, Bytes::from_static(b"text"))
            .unwrap();
        assert!(payload.as_any().is::<RawBox>());
    }

    #[test]
    fn test_nested_context_is_bounded() {
        let registry = BoxRegistry::new();
        let mut ctx = ReadContext::new(&registry);
        for _ in 0..ReadContext::MAX_DEPTH {
            ctx = ctx.nested().unwrap();
        }
        assert_eq!(ctx.depth, ReadContext::MAX_DEPTH);
        assert!(matches!(
            ctx.nested(),
            Err(Error::NestingTooDeep { limit: ReadContext::MAX_DEPTH })
        ));
    }

    #[test]
    fn test_default_registry_is_shared() {
        assert!(std::ptr::eq(default_registry(), default_registry()));
        assert!(default_registry().contains(BoxType::WVTT));
    }
}
