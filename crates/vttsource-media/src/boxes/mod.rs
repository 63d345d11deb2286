//! Generic box tree engine.
//!
//! Every box is framed as `u32 size | u32 type | payload` (big-endian, with a
//! 64-bit extended size when needed). The payload is a type-specific
//! [`BoxPayload`] chosen through a [`BoxRegistry`]; unknown types fall back to
//! [`RawBox`] so that an unrecognised sibling never aborts its parent.
//!
//! Sizes are computed bottom-up by [`IsoBox::compute_size`] and must be
//! current before [`IsoBox::write`].

/// Implements the `Any` accessors of [`BoxPayload`].
macro_rules! payload_any {
    () => {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
        fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
            self
        }
    };
}
pub(crate) use payload_any;

mod dump;
mod fragment;
mod generic;
mod header;
mod registry;
mod track;

pub use dump::DumpWriter;
pub use fragment::{MfhdBox, TfdtBox, TfhdBox, TrunBox, TrunEntry};
pub use generic::{ContainerBox, RawBox};
pub use header::{
    ensure_remaining, read_version_and_flags, write_version_and_flags, BoxHeader, BoxType,
};
pub use registry::{default_registry, BoxKind, BoxRegistry, NewFn, ParseFn, ReadContext};
pub use track::{HdlrBox, MdhdBox, SampleDescriptionBox};

use bytes::{Buf, Bytes, BytesMut};
use std::any::Any;
use std::fmt;
use vttsource_common::{Error, Result};

/// Type-specific payload of a box.
pub trait BoxPayload: fmt::Debug + Send + Sync + 'static {
    /// Payload size in bytes, recomputing nested box sizes first.
    fn compute_size(&mut self) -> Result<u64>;

    /// Serialize the payload (everything after the header).
    fn write_payload(&self, buf: &mut BytesMut) -> Result<()>;

    /// Emit a human-readable trace of this payload and its children.
    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A node of the box tree. Owns its payload, and through it, its children.
#[derive(Debug)]
pub struct IsoBox {
    box_type: BoxType,
    size: u64,
    payload: Box<dyn BoxPayload>,
}

impl IsoBox {
    /// Wrap a payload. The size stays 0 until [`compute_size`](Self::compute_size).
    pub fn new<P: BoxPayload>(box_type: BoxType, payload: P) -> Self {
        Self::from_boxed(box_type, Box::new(payload))
    }

    pub fn from_boxed(box_type: BoxType, payload: Box<dyn BoxPayload>) -> Self {
        Self {
            box_type,
            size: 0,
            payload,
        }
    }

    pub fn box_type(&self) -> BoxType {
        self.box_type
    }

    /// Total size including header: the wire size after a read, the
    /// computed size after [`compute_size`](Self::compute_size), 0 otherwise.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Borrow the payload as a concrete type.
    pub fn payload<T: BoxPayload>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    /// Mutably borrow the payload as a concrete type.
    pub fn payload_mut<T: BoxPayload>(&mut self) -> Option<&mut T> {
        self.payload.as_any_mut().downcast_mut::<T>()
    }

    /// Take the payload as a concrete type, or get the box back unchanged.
    pub fn into_payload<T: BoxPayload>(self) -> std::result::Result<T, IsoBox> {
        if self.payload.as_any().is::<T>() {
            match self.payload.into_any().downcast::<T>() {
                Ok(payload) => Ok(*payload),
                Err(_) => unreachable!("payload type checked above"),
            }
        } else {
            Err(self)
        }
    }

    /// Read one box, consuming exactly its declared size from `buf`.
    pub fn read(buf: &mut Bytes, registry: &BoxRegistry) -> Result<Self> {
        let (header, payload) = read_frame(buf)?;
        let payload = ReadContext::new(registry).parse_payload(header.box_type, payload)?;
        Ok(Self {
            box_type: header.box_type,
            size: header.size,
            payload,
        })
    }

    /// Recompute this box's size (and all nested sizes). Returns the total.
    pub fn compute_size(&mut self) -> Result<u64> {
        let payload_size = self.payload.compute_size()?;
        self.size = BoxHeader::for_payload(self.box_type, payload_size).size;
        Ok(self.size)
    }

    /// Serialize header and payload. The size must have been computed.
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        if self.size == 0 {
            return Err(Error::state(format!(
                "size of box '{}' has not been computed",
                self.box_type
            )));
        }

        let start = buf.len();
        let header_size = BoxHeader::header_size_for(self.size);
        BoxHeader {
            box_type: self.box_type,
            size: self.size,
            header_size,
        }
        .write(buf);
        self.payload.write_payload(buf)?;

        let written = (buf.len() - start) as u64;
        if written != self.size {
            return Err(Error::state(format!(
                "box '{}' wrote {} bytes but its computed size is {}; recompute after mutation",
                self.box_type, written, self.size
            )));
        }
        Ok(())
    }

    /// Compute the size and serialize in one step.
    pub fn to_bytes(&mut self) -> Result<Bytes> {
        let size = self.compute_size()?;
        let mut buf = BytesMut::with_capacity(size as usize);
        self.write(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append this box's trace to a dump in progress.
    pub fn dump_into(&self, w: &mut DumpWriter) {
        self.payload.dump(self.box_type, self.size, w);
    }

    /// Human-readable trace of this box and its children. Not round-trippable.
    pub fn dump(&self) -> String {
        let mut w = DumpWriter::new();
        self.dump_into(&mut w);
        w.finish()
    }
}

/// Split one framed box off `buf`: its header and exactly its payload bytes.
pub fn read_frame(buf: &mut Bytes) -> Result<(BoxHeader, Bytes)> {
    let available = buf.remaining() as u64;
    let header = BoxHeader::read(buf)?;
    let payload_size = header.payload_size();
    if payload_size > buf.remaining() as u64 {
        return Err(Error::truncated(header.size, available));
    }
    Ok((header, buf.split_to(payload_size as usize)))
}

/// Read a sequence of sibling boxes filling `payload`.
///
/// `parent` is the context of the box that owns the list. Framing errors and
/// excessive nesting abort the list. A child whose payload fails to parse
/// otherwise is kept as a [`RawBox`] and parsing continues with the next
/// sibling.
pub fn read_box_list(mut payload: Bytes, parent: &ReadContext<'_>) -> Result<Vec<IsoBox>> {
    let mut children = Vec::new();
    if !payload.has_remaining() {
        return Ok(children);
    }
    let ctx = parent.nested()?;
    while payload.has_remaining() {
        let (header, body) = read_frame(&mut payload)?;
        let parsed = match ctx.parse_payload(header.box_type, body.clone()) {
            Ok(parsed) => parsed,
            Err(e @ Error::NestingTooDeep { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Keeping malformed '{}' box ({} bytes) as raw data: {}",
                    header.box_type,
                    header.size,
                    e
                );
                Box::new(RawBox::new(body))
            }
        };
        children.push(IsoBox {
            box_type: header.box_type,
            size: header.size,
            payload: parsed,
        });
    }
    Ok(children)
}

/// Read every top-level box in `data`.
pub fn read_boxes(data: impl Into<Bytes>, registry: &BoxRegistry) -> Result<Vec<IsoBox>> {
    let mut buf = data.into();
    let mut boxes = Vec::new();
    while buf.has_remaining() {
        boxes.push(IsoBox::read(&mut buf, registry)?);
    }
    Ok(boxes)
}

/// Sum of the computed sizes of `children`.
pub fn compute_children_size(children: &mut [IsoBox]) -> Result<u64> {
    let mut total = 0u64;
    for child in children.iter_mut() {
        total += child.compute_size()?;
    }
    Ok(total)
}

/// Write `children` in order.
pub fn write_children(children: &[IsoBox], buf: &mut BytesMut) -> Result<()> {
    for child in children {
        child.write(buf)?;
    }
    Ok(())
}

/// Depth-first search for the first box of `box_type` under `boxes`.
pub fn find_box<'a>(boxes: &'a [IsoBox], box_type: BoxType) -> Option<&'a IsoBox> {
    for b in boxes {
        if b.box_type() == box_type {
            return Some(b);
        }
        if let Some(container) = b.payload::<ContainerBox>() {
            if let Some(found) = find_box(&container.children, box_type) {
                return Some(found);
            }
        }
        if let Some(stsd) = b.payload::<SampleDescriptionBox>() {
            if let Some(found) = find_box(&stsd.entries, box_type) {
                return Some(found);
            }
        }
    }
    None
}
