//! Fallback payloads: opaque bytes and plain child lists.

use super::{
    compute_children_size, payload_any, read_box_list, write_children, BoxPayload, BoxType,
    DumpWriter, IsoBox, ReadContext,
};
use bytes::{BufMut, Bytes, BytesMut};
use vttsource_common::Result;

/// Payload of an unrecognised box, kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBox {
    pub data: Bytes,
}

impl RawBox {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub(crate) fn parse(_box_type: BoxType, payload: Bytes, _: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        Ok(Box::new(Self::new(payload)))
    }
}

impl BoxPayload for RawBox {
    fn compute_size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&self.data);
        Ok(())
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box("UnknownBox", box_type, size, &[("DataLength", self.data.len().to_string())]);
        w.end_box("UnknownBox");
    }

    payload_any!();
}

/// Payload made only of child boxes (moov, trak, moof, traf, ...).
#[derive(Debug, Default)]
pub struct ContainerBox {
    pub children: Vec<IsoBox>,
}

impl ContainerBox {
    pub fn with_children(children: Vec<IsoBox>) -> Self {
        Self { children }
    }

    /// First direct child of the given type.
    pub fn child(&self, box_type: BoxType) -> Option<&IsoBox> {
        self.children.iter().find(|c| c.box_type() == box_type)
    }

    pub fn child_mut(&mut self, box_type: BoxType) -> Option<&mut IsoBox> {
        self.children.iter_mut().find(|c| c.box_type() == box_type)
    }

    pub(crate) fn parse(_box_type: BoxType, payload: Bytes, ctx: &ReadContext<'_>) -> Result<Box<dyn BoxPayload>> {
        Ok(Box::new(Self {
            children: read_box_list(payload, ctx)?,
        }))
    }
}

impl BoxPayload for ContainerBox {
    fn compute_size(&mut self) -> Result<u64> {
        compute_children_size(&mut self.children)
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        write_children(&self.children, buf)
    }

    fn dump(&self, box_type: BoxType, size: u64, w: &mut DumpWriter) {
        w.begin_box("ContainerBox", box_type, size, &[]);
        for child in &self.children {
            child.dump_into(w);
        }
        w.end_box("ContainerBox");
    }

    payload_any!();
}
