//! Media source: owns the source buffers and the ready-state machine.

use crate::events::{Event, EventBus, EventPayload};
use crate::options::SourceBufferOptions;
use crate::parser::{ParserCommand, ParserFactory};
use crate::source_buffer::{AbortMode, SourceBuffer};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;
use vttsource_common::{Error, MediaSourceId, Result, SourceBufferId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Closed,
    Open,
    Ended,
}

/// Presentation duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Duration {
    /// Not attached.
    NaN,
    /// Open-ended live presentation.
    Infinity,
    Value(f64),
}

impl Duration {
    pub fn as_secs_f64(&self) -> f64 {
        match self {
            Duration::NaN => f64::NAN,
            Duration::Infinity => f64::INFINITY,
            Duration::Value(v) => *v,
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Duration::NaN => write!(f, "NaN"),
            Duration::Infinity => write!(f, "Infinity"),
            Duration::Value(v) => write!(f, "{:.3}", v),
        }
    }
}

/// A set of source buffers fed by one producer.
///
/// The media source exclusively owns its buffers; each buffer only carries
/// the [`MediaSourceId`] of its owner.
#[derive(Debug)]
pub struct MediaSource {
    id: MediaSourceId,
    ready_state: ReadyState,
    duration: Duration,
    buffers: Vec<SourceBuffer>,
    factory: ParserFactory,
    options: SourceBufferOptions,
    events: Arc<EventBus>,
    object_url: Option<String>,
}

impl MediaSource {
    pub fn new() -> Self {
        Self {
            id: MediaSourceId::new(),
            ready_state: ReadyState::Closed,
            duration: Duration::NaN,
            buffers: Vec::new(),
            factory: ParserFactory::new(),
            options: SourceBufferOptions::default(),
            events: Arc::new(EventBus::default()),
            object_url: None,
        }
    }

    /// Media source whose buffers are created with `options`.
    pub fn with_options(options: SourceBufferOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            ..Self::new()
        })
    }

    /// Builder: replace the parser factory.
    pub fn with_factory(mut self, factory: ParserFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn id(&self) -> MediaSourceId {
        self.id
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn is_type_supported(&self, mime: &str) -> bool {
        self.factory.is_type_supported(mime)
    }

    /// A unique `blob:` URL naming this media source.
    pub fn create_object_url(&mut self) -> String {
        let url = format!("blob:{}", Uuid::new_v4());
        self.object_url = Some(url.clone());
        url
    }

    pub fn matches_url(&self, url: &str) -> bool {
        self.object_url.as_deref() == Some(url)
    }

    fn emit(&self, payload: EventPayload) {
        self.events.broadcast(self.id, payload);
    }

    fn require_open(&self, operation: &str) -> Result<()> {
        if self.ready_state != ReadyState::Open {
            return Err(Error::state(format!(
                "{} requires an open media source (state {:?})",
                operation, self.ready_state
            )));
        }
        Ok(())
    }

    /// Attach to a playback context: `Closed` to `Open`.
    pub fn attach(&mut self) -> Result<()> {
        if self.ready_state != ReadyState::Closed {
            return Err(Error::state("media source is already attached"));
        }
        self.ready_state = ReadyState::Open;
        self.duration = Duration::Infinity;
        tracing::info!("Media source {} opened", self.id);
        self.emit(EventPayload::SourceOpen);
        Ok(())
    }

    /// Detach from the playback context, releasing every source buffer.
    pub fn detach(&mut self) -> Result<()> {
        if self.ready_state == ReadyState::Closed {
            return Err(Error::state("media source is not attached"));
        }
        for buffer in self.buffers.drain(..) {
            if buffer.request_abort(AbortMode::Continuation).is_ok() {
                tracing::debug!("Aborted buffer {} on detach", buffer.id());
            }
        }
        self.ready_state = ReadyState::Closed;
        self.duration = Duration::NaN;
        tracing::info!("Media source {} closed", self.id);
        self.emit(EventPayload::SourceClose);
        Ok(())
    }

    /// Signal end of stream. The duration is pinned to the highest buffered
    /// end time.
    pub fn end_of_stream(&mut self) -> Result<()> {
        self.require_open("end of stream")?;
        if let Some(buffer) = self.buffers.iter().find(|b| b.is_updating()) {
            return Err(Error::state(format!(
                "buffer {} is still updating",
                buffer.id()
            )));
        }
        let end = self
            .buffers
            .iter()
            .filter_map(|b| b.buffered().last_end())
            .fold(0.0, f64::max);
        self.duration = Duration::Value(end);
        self.ready_state = ReadyState::Ended;
        tracing::info!("Media source {} ended at {:.3}s", self.id, end);
        self.emit(EventPayload::SourceEnded);
        Ok(())
    }

    /// Set the presentation duration. Infinite values mean a live stream.
    pub fn set_duration(&mut self, duration: f64) -> Result<()> {
        if duration.is_nan() || duration < 0.0 {
            return Err(Error::parameter(format!("invalid duration {}", duration)));
        }
        self.require_open("set duration")?;
        if self.buffers.iter().any(SourceBuffer::is_updating) {
            return Err(Error::state("cannot change duration while a buffer is updating"));
        }
        self.duration = if duration.is_infinite() {
            Duration::Infinity
        } else {
            Duration::Value(duration)
        };
        Ok(())
    }

    /// Create a buffer for `mime`, e.g. `text/mp4; codecs="wvtt"`.
    pub fn add_source_buffer(&mut self, mime: &str) -> Result<SourceBufferId> {
        self.require_open("add source buffer")?;
        let parser = self.factory.create(mime)?;
        let buffer = SourceBuffer::new(
            self.id,
            mime,
            parser,
            &self.options,
            Arc::clone(&self.events),
        );
        let id = buffer.id();
        tracing::info!("Media source {} added buffer {} ({})", self.id, id, mime);
        self.buffers.push(buffer);
        Ok(id)
    }

    /// Remove a buffer, aborting any append in flight on it.
    pub fn remove_source_buffer(&mut self, id: SourceBufferId) -> Result<()> {
        let index = self
            .buffers
            .iter()
            .position(|b| b.id() == id)
            .ok_or_else(|| Error::parameter(format!("no source buffer {}", id)))?;
        let buffer = self.buffers.remove(index);
        if buffer.request_abort(AbortMode::Continuation).is_ok() {
            tracing::debug!("Aborted buffer {} on removal", id);
        }
        tracing::info!("Media source {} removed buffer {}", self.id, id);
        Ok(())
    }

    pub fn source_buffer(&self, id: SourceBufferId) -> Option<&SourceBuffer> {
        self.buffers.iter().find(|b| b.id() == id)
    }

    fn buffer(&self, id: SourceBufferId) -> Result<&SourceBuffer> {
        self.source_buffer(id)
            .ok_or_else(|| Error::parameter(format!("no source buffer {}", id)))
    }

    pub fn source_buffers(&self) -> &[SourceBuffer] {
        &self.buffers
    }

    /// Buffers that have received an initialization segment.
    pub fn active_source_buffers(&self) -> Vec<&SourceBuffer> {
        self.buffers.iter().filter(|b| b.has_init_segment()).collect()
    }

    /// Append a segment chunk and parse it on the calling thread.
    pub fn append(&self, id: SourceBufferId, data: impl Into<Bytes>) -> Result<()> {
        self.require_open("append")?;
        let buffer = self.buffer(id)?;
        buffer.begin_append(data.into())?;
        buffer.run_append()
    }

    /// Append a segment chunk and parse it on a blocking task.
    ///
    /// Gate failures are reported here; parse failures through the handle.
    pub fn spawn_append(
        &self,
        id: SourceBufferId,
        data: impl Into<Bytes>,
    ) -> Result<JoinHandle<Result<()>>> {
        self.require_open("append")?;
        let buffer = self.buffer(id)?.clone();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::state("spawn_append requires a tokio runtime"))?;
        buffer.begin_append(data.into())?;
        Ok(runtime.spawn_blocking(move || buffer.run_append()))
    }

    /// Abort the append in flight on a buffer.
    pub fn abort(&self, id: SourceBufferId, mode: AbortMode) -> Result<()> {
        self.buffer(id)?.request_abort(mode)
    }

    /// Remove buffered media in `[start, end)` on the calling thread.
    pub fn remove(&self, id: SourceBufferId, start: f64, end: f64) -> Result<()> {
        self.require_open("remove")?;
        let buffer = self.buffer(id)?;
        buffer.begin_remove(start, end)?;
        buffer.run_remove(start, end)
    }

    pub fn spawn_remove(
        &self,
        id: SourceBufferId,
        start: f64,
        end: f64,
    ) -> Result<JoinHandle<Result<()>>> {
        self.require_open("remove")?;
        let buffer = self.buffer(id)?.clone();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::state("spawn_remove requires a tokio runtime"))?;
        buffer.begin_remove(start, end)?;
        Ok(runtime.spawn_blocking(move || buffer.run_remove(start, end)))
    }

    /// Pass a container-layer command to a buffer's parser.
    pub fn queue_parser_command(&self, id: SourceBufferId, command: ParserCommand) -> Result<()> {
        self.buffer(id)?.queue_parser_command(command)
    }
}

impl Default for MediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIME: &str = "text/mp4; codecs=\"wvtt\"";

    #[test]
    fn test_ready_state_transitions() {
        let mut source = MediaSource::new();
        assert_eq!(source.ready_state(), ReadyState::Closed);
        assert_eq!(source.duration(), Duration::NaN);

        source.attach().unwrap();
        assert_eq!(source.ready_state(), ReadyState::Open);
        assert_eq!(source.duration(), Duration::Infinity);
        assert!(source.attach().is_err());

        source.add_source_buffer(MIME).unwrap();
        source.end_of_stream().unwrap();
        assert_eq!(source.ready_state(), ReadyState::Ended);
        assert_eq!(source.duration(), Duration::Value(0.0));

        source.detach().unwrap();
        assert_eq!(source.ready_state(), ReadyState::Closed);
        assert!(source.source_buffers().is_empty());
        assert!(source.duration().as_secs_f64().is_nan());
    }

    #[test]
    fn test_add_source_buffer_requires_open() {
        let mut source = MediaSource::new();
        let err = source.add_source_buffer(MIME).unwrap_err();
        assert_eq!(err.kind(), vttsource_common::ErrorKind::State);
    }

    #[test]
    fn test_unsupported_mime() {
        let mut source = MediaSource::new();
        source.attach().unwrap();
        let err = source.add_source_buffer("video/webm").unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
        assert!(source.source_buffers().is_empty());
    }

    #[test]
    fn test_remove_source_buffer() {
        let mut source = MediaSource::new();
        source.attach().unwrap();
        let a = source.add_source_buffer(MIME).unwrap();
        let b = source.add_source_buffer(MIME).unwrap();
        source.remove_source_buffer(a).unwrap();
        assert!(source.source_buffer(a).is_none());
        assert!(source.source_buffer(b).is_some());
        assert!(source.remove_source_buffer(a).is_err());
        assert_eq!(source.source_buffer(b).unwrap().source_id(), source.id());
    }

    #[test]
    fn test_object_url() {
        let mut source = MediaSource::new();
        let url = source.create_object_url();
        assert!(url.starts_with("blob:"));
        assert!(source.matches_url(&url));
        assert!(!MediaSource::new().matches_url(&url));
    }

    #[test]
    fn test_spawn_without_runtime_keeps_gate_free() {
        let mut source = MediaSource::new();
        source.attach().unwrap();
        let id = source.add_source_buffer(MIME).unwrap();
        assert!(source.spawn_append(id, Bytes::new()).is_err());
        assert!(!source.source_buffer(id).unwrap().is_updating());
    }

    #[test]
    fn test_abort_while_idle_is_state_error() {
        let mut source = MediaSource::new();
        source.attach().unwrap();
        let id = source.add_source_buffer(MIME).unwrap();
        let err = source.abort(id, AbortMode::Continuation).unwrap_err();
        assert_eq!(err.kind(), vttsource_common::ErrorKind::State);
    }

    #[test]
    fn test_duration_serializes_tagged() {
        let json = serde_json::to_string(&Duration::Value(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"value","value":1.5}"#);
        let json = serde_json::to_string(&Duration::Infinity).unwrap();
        assert_eq!(json, r#"{"type":"infinity"}"#);
    }
}
