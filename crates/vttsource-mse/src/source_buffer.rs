//! Source buffer: the append / abort / remove state machine.
//!
//! A [`SourceBuffer`] is a cheap handle around shared state. All mutation of
//! buffered media goes through one of two workers, append and remove, which
//! are mutually exclusive through the `updating` gate. The gate is taken and
//! released in short critical sections; the parse itself runs without
//! holding the state lock so that `abort` and parser commands can be issued
//! while it is in progress.

use crate::events::{EventBus, EventPayload};
use crate::options::{validate_append_window, SourceBufferOptions};
use crate::parser::{ParsedSample, ParserCommand, ParserEvent, SegmentParser};
use crate::time_ranges::TimeRanges;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use vttsource_common::{Error, MediaSourceId, Result, SourceBufferId};
use vttsource_media::webvtt::{Timestamp, WebVttCue, WebVttSample};

/// Segment parser loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppendState {
    WaitingForSegment,
    ParsingInitSegment,
    ParsingMediaSegment,
}

/// Behaviour of [`SourceBuffer::abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortMode {
    /// Do nothing.
    None,
    /// Drop the in-flight segment and continue from the last committed sample.
    Continuation,
    /// As `Continuation`, and reset the timestamp offset.
    Offset,
}

/// The operation holding the `updating` gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Append,
    Remove,
}

/// A decoded sample held by the buffer, in presentation time.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedSample {
    pub start: f64,
    pub end: f64,
    pub sample: WebVttSample,
    /// Encoded size in bytes, counted against the buffer capacity.
    pub size: u64,
}

impl BufferedSample {
    fn new(start: f64, end: f64, sample: WebVttSample) -> Result<Self> {
        let size = sample.encode()?.data.len() as u64;
        Ok(Self {
            start,
            end,
            sample,
            size,
        })
    }

    /// Split into `[start, t)` and `[t, end)`, splitting every cue that
    /// spans `t`.
    ///
    /// Cue times have millisecond resolution: a cue whose edge rounds onto
    /// `t` is kept whole on its side of the split.
    fn split_at(self, t: f64) -> Result<(Self, Self)> {
        let at = Timestamp::from_secs_f64(t);
        if at.as_secs_f64() != t {
            tracing::debug!("Split point {:.6}s rounded to {} for cue timing", t, at);
        }
        let mut head = Vec::new();
        let mut tail = Vec::new();
        for mut cue in self.sample.cues {
            if cue.end <= at {
                head.push(cue);
            } else if cue.start >= at {
                tail.push(cue);
            } else {
                let rest = cue.split_at(at)?;
                head.push(cue);
                tail.push(rest);
            }
        }
        Ok((
            Self::new(self.start, t, WebVttSample::new(head))?,
            Self::new(t, self.end, WebVttSample::new(tail))?,
        ))
    }
}

#[derive(Debug)]
struct BufferState {
    append_state: AppendState,
    updating: Option<Operation>,
    pending_abort: Option<AbortMode>,
    timestamp_offset: f64,
    append_window_start: f64,
    append_window_end: f64,
    capacity: Option<u64>,
    samples: Vec<BufferedSample>,
    buffered: TimeRanges,
    retained_bytes: u64,
    highest_end: Option<f64>,
    buffer_full: bool,
    timescale: Option<u32>,
    config: Option<String>,
    first_init_segment: bool,
    continuation_timestamp: Option<f64>,
    continuation_flag: bool,
    last_remove: Option<(f64, f64)>,
}

impl BufferState {
    fn new(options: &SourceBufferOptions) -> Self {
        Self {
            append_state: AppendState::WaitingForSegment,
            updating: None,
            pending_abort: None,
            timestamp_offset: 0.0,
            append_window_start: options.append_window_start,
            append_window_end: options.append_window_end,
            capacity: options.capacity_bytes,
            samples: Vec::new(),
            buffered: TimeRanges::new(),
            retained_bytes: 0,
            highest_end: None,
            buffer_full: false,
            timescale: None,
            config: None,
            first_init_segment: false,
            continuation_timestamp: None,
            continuation_flag: false,
            last_remove: None,
        }
    }

    /// Clip one parsed sample to the append window and store it.
    fn commit_sample(&mut self, parsed: ParsedSample) -> Result<()> {
        let start = parsed.start + self.timestamp_offset;
        let end = parsed.end + self.timestamp_offset;
        if !(start < end) {
            tracing::debug!("Dropping zero-length sample at {:.3}", start);
            return Ok(());
        }
        if end <= self.append_window_start || start >= self.append_window_end {
            tracing::debug!(
                "Dropping sample [{:.3}, {:.3}) outside append window [{:.3}, {:.3})",
                start,
                end,
                self.append_window_start,
                self.append_window_end
            );
            return Ok(());
        }

        let sample = WebVttSample::decode_timed(
            parsed.data,
            Timestamp::from_secs_f64(start),
            Timestamp::from_secs_f64(end),
        )?;
        let mut piece = BufferedSample::new(start, end, sample)?;
        if piece.start < self.append_window_start {
            piece = piece.split_at(self.append_window_start)?.1;
        }
        if piece.end > self.append_window_end {
            piece = piece.split_at(self.append_window_end)?.0;
        }

        // Overlapping media is replaced by the newer sample.
        self.remove_range(piece.start, piece.end)?;

        let (start, end) = (piece.start, piece.end);
        self.retained_bytes += piece.size;
        let index = self.samples.partition_point(|s| s.start < start);
        self.samples.insert(index, piece);
        self.buffered.add(start, end);
        self.highest_end = Some(self.highest_end.map_or(end, |h| h.max(end)));

        if let Some(capacity) = self.capacity {
            if self.retained_bytes > capacity && !self.buffer_full {
                tracing::warn!(
                    "Buffer full: {} bytes retained, capacity {}",
                    self.retained_bytes,
                    capacity
                );
                self.buffer_full = true;
            }
        }
        tracing::debug!("Committed sample [{:.3}, {:.3})", start, end);
        Ok(())
    }

    /// Delete media in `[start, end)`. Samples crossing an edge keep their
    /// outside part.
    ///
    /// Samples are disjoint and sorted by start, so their ends are sorted too
    /// and the affected samples form one contiguous run.
    fn remove_range(&mut self, start: f64, end: f64) -> Result<()> {
        let first = self.samples.partition_point(|s| s.end <= start);
        let last = self.samples.partition_point(|s| s.start < end);
        if first >= last {
            return Ok(());
        }

        // Only the first and last affected samples can reach outside the range.
        let mut kept = Vec::with_capacity(2);
        if self.samples[first].start < start {
            kept.push(self.samples[first].clone().split_at(start)?.0);
        }
        if self.samples[last - 1].end > end {
            kept.push(self.samples[last - 1].clone().split_at(end)?.1);
        }

        let removed: u64 = self.samples.drain(first..last).map(|s| s.size).sum();
        self.retained_bytes = self.retained_bytes - removed + kept.iter().map(|s| s.size).sum::<u64>();
        self.samples.splice(first..first, kept);

        self.buffered.subtract(start, end);
        self.highest_end = self.samples.last().map(|s| s.end);
        if self.buffer_full && self.capacity.map_or(true, |c| self.retained_bytes <= c) {
            tracing::info!("Buffer no longer full ({} bytes retained)", self.retained_bytes);
            self.buffer_full = false;
        }
        Ok(())
    }
}

/// Parser handle plus the commands queued for it while it was busy.
struct ParserSlot {
    parser: Option<Box<dyn SegmentParser>>,
    commands: VecDeque<ParserCommand>,
    pending_input: Option<Bytes>,
}

impl ParserSlot {
    fn drain_commands(&mut self) {
        let Some(parser) = self.parser.as_mut() else {
            return;
        };
        while let Some(command) = self.commands.pop_front() {
            if let Err(e) = parser.handle_command(command) {
                tracing::warn!("Parser command {:?} failed: {}", command, e);
            }
        }
    }
}

struct Inner {
    id: SourceBufferId,
    source: MediaSourceId,
    mime_type: String,
    state: Mutex<BufferState>,
    parser: Mutex<ParserSlot>,
    events: Arc<EventBus>,
}

/// Handle to one source buffer. Clones share the same buffer.
#[derive(Clone)]
pub struct SourceBuffer {
    inner: Arc<Inner>,
}

impl SourceBuffer {
    pub(crate) fn new(
        source: MediaSourceId,
        mime_type: &str,
        parser: Box<dyn SegmentParser>,
        options: &SourceBufferOptions,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: SourceBufferId::new(),
                source,
                mime_type: mime_type.to_string(),
                state: Mutex::new(BufferState::new(options)),
                parser: Mutex::new(ParserSlot {
                    parser: Some(parser),
                    commands: VecDeque::new(),
                    pending_input: None,
                }),
                events,
            }),
        }
    }

    pub fn id(&self) -> SourceBufferId {
        self.inner.id
    }

    /// The media source this buffer belongs to.
    pub fn source_id(&self) -> MediaSourceId {
        self.inner.source
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    pub fn append_state(&self) -> AppendState {
        self.inner.state.lock().append_state
    }

    pub fn is_updating(&self) -> bool {
        self.inner.state.lock().updating.is_some()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.inner.state.lock().updating
    }

    pub fn buffered(&self) -> TimeRanges {
        self.inner.state.lock().buffered.clone()
    }

    pub fn timestamp_offset(&self) -> f64 {
        self.inner.state.lock().timestamp_offset
    }

    pub fn append_window(&self) -> (f64, f64) {
        let state = self.inner.state.lock();
        (state.append_window_start, state.append_window_end)
    }

    pub fn highest_end_timestamp(&self) -> Option<f64> {
        self.inner.state.lock().highest_end
    }

    pub fn is_buffer_full(&self) -> bool {
        self.inner.state.lock().buffer_full
    }

    pub fn retained_bytes(&self) -> u64 {
        self.inner.state.lock().retained_bytes
    }

    pub fn timescale(&self) -> Option<u32> {
        self.inner.state.lock().timescale
    }

    /// `vttC` config of the last initialization segment.
    pub fn config(&self) -> Option<String> {
        self.inner.state.lock().config.clone()
    }

    pub fn has_init_segment(&self) -> bool {
        self.inner.state.lock().first_init_segment
    }

    /// Timestamp recorded by the last continuation abort, while the
    /// continuation flag is set.
    pub fn continuation_timestamp(&self) -> Option<f64> {
        let state = self.inner.state.lock();
        if state.continuation_flag {
            state.continuation_timestamp
        } else {
            None
        }
    }

    /// `[start, end)` of the most recent remove.
    pub fn last_remove(&self) -> Option<(f64, f64)> {
        self.inner.state.lock().last_remove
    }

    /// Snapshot of the buffered samples, ascending by start.
    pub fn samples(&self) -> Vec<BufferedSample> {
        self.inner.state.lock().samples.clone()
    }

    /// Cues of every sample whose extent contains `t`.
    pub fn active_cues(&self, t: f64) -> Vec<WebVttCue> {
        self.inner
            .state
            .lock()
            .samples
            .iter()
            .filter(|s| s.start <= t && t < s.end)
            .flat_map(|s| s.sample.cues.iter().cloned())
            .collect()
    }

    pub fn set_timestamp_offset(&self, offset: f64) -> Result<()> {
        if !offset.is_finite() {
            return Err(Error::parameter(format!("timestamp offset {} is not finite", offset)));
        }
        let mut state = self.inner.state.lock();
        if state.updating.is_some() {
            return Err(Error::state("cannot change timestamp offset while updating"));
        }
        if state.append_state == AppendState::ParsingMediaSegment {
            return Err(Error::state(
                "cannot change timestamp offset while parsing a media segment",
            ));
        }
        state.timestamp_offset = offset;
        Ok(())
    }

    pub fn set_append_window(&self, start: f64, end: f64) -> Result<()> {
        validate_append_window(start, end)?;
        let mut state = self.inner.state.lock();
        if state.updating.is_some() {
            return Err(Error::state("cannot change append window while updating"));
        }
        state.append_window_start = start;
        state.append_window_end = end;
        Ok(())
    }

    /// Forward a command to the parser, or queue it while a parse holds the
    /// parser.
    pub fn queue_parser_command(&self, command: ParserCommand) -> Result<()> {
        let mut slot = self.inner.parser.lock();
        slot.commands.push_back(command);
        if slot.parser.is_some() {
            slot.drain_commands();
        } else {
            tracing::debug!("Parser busy, queued {:?}", command);
        }
        Ok(())
    }

    fn emit(&self, payload: EventPayload) {
        self.inner.events.broadcast(self.inner.source, payload);
    }

    fn reset_parser(&self) {
        let mut slot = self.inner.parser.lock();
        slot.pending_input = None;
        if let Some(parser) = slot.parser.as_mut() {
            parser.reset();
        }
    }

    /// Take the `updating` gate for an append and stash the input.
    pub(crate) fn begin_append(&self, data: Bytes) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if let Some(op) = state.updating {
                return Err(Error::state(format!("append while {:?} is in progress", op)));
            }
            if state.buffer_full {
                return Err(Error::capacity(format!(
                    "{} bytes retained; remove media before appending",
                    state.retained_bytes
                )));
            }
            state.updating = Some(Operation::Append);
            state.pending_abort = None;
            self.inner.parser.lock().pending_input = Some(data);
        }
        tracing::debug!("Buffer {} append started", self.inner.id);
        self.emit(EventPayload::UpdateStart {
            buffer: self.inner.id,
        });
        Ok(())
    }

    /// Parse the stashed input and release the gate.
    pub(crate) fn run_append(&self) -> Result<()> {
        let result = self.parse_pending();
        self.finish_append(result)
    }

    fn parse_pending(&self) -> Result<()> {
        let (mut parser, input) = {
            let mut slot = self.inner.parser.lock();
            slot.drain_commands();
            let input = slot.pending_input.take();
            match slot.parser.take() {
                Some(parser) => (parser, input),
                None => return Err(Error::state("parser is already in use")),
            }
        };

        let result = match input {
            Some(data) => parser.parse(data, &mut |event| self.handle_parser_event(event)),
            None => Ok(()),
        };

        let mut slot = self.inner.parser.lock();
        slot.parser = Some(parser);
        slot.drain_commands();
        result
    }

    fn handle_parser_event(&self, event: ParserEvent) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.pending_abort.is_some() {
            return Err(Error::state("append aborted"));
        }
        match event {
            ParserEvent::InitSegmentStart => {
                state.append_state = AppendState::ParsingInitSegment;
            }
            ParserEvent::InitSegment(info) => {
                tracing::info!(
                    "Buffer {} received init segment (timescale {})",
                    self.inner.id,
                    info.timescale
                );
                state.timescale = Some(info.timescale);
                state.config = Some(info.config);
                state.first_init_segment = true;
                state.append_state = AppendState::WaitingForSegment;
            }
            ParserEvent::MediaSegmentStart => {
                if !state.first_init_segment {
                    return Err(Error::parse("media segment before the first init segment"));
                }
                state.append_state = AppendState::ParsingMediaSegment;
            }
            ParserEvent::Sample(sample) => {
                if state.append_state != AppendState::ParsingMediaSegment {
                    return Err(Error::parse("sample outside a media segment"));
                }
                state.commit_sample(sample)?;
                state.continuation_flag = false;
            }
            ParserEvent::MediaSegmentEnd => {
                state.append_state = AppendState::WaitingForSegment;
            }
        }
        Ok(())
    }

    /// Release the `updating` gate once the parser is back in a clean state.
    ///
    /// The parser is reset before the gate is released, so the next append
    /// cannot stash input that the reset would then discard.
    fn finish_append(&self, result: Result<()>) -> Result<()> {
        let id = self.inner.id;
        let abort = self.inner.state.lock().pending_abort;
        if abort.is_some() || result.is_err() {
            self.reset_parser();
        }
        let mut state = self.inner.state.lock();

        if let Some(mode) = abort {
            state.pending_abort = None;
            state.append_state = AppendState::WaitingForSegment;
            state.continuation_timestamp = state.highest_end;
            state.continuation_flag = true;
            if mode == AbortMode::Offset {
                state.timestamp_offset = 0.0;
            }
            state.updating = None;
            drop(state);
            tracing::info!("Buffer {} append aborted ({:?})", id, mode);
            self.emit(EventPayload::Abort { buffer: id });
            self.emit(EventPayload::UpdateEnd { buffer: id });
            return Ok(());
        }

        match result {
            Ok(()) => {
                // An abort requested after the parse returned has nothing left to stop.
                state.pending_abort = None;
                state.updating = None;
                drop(state);
                self.emit(EventPayload::Update { buffer: id });
                self.emit(EventPayload::UpdateEnd { buffer: id });
                Ok(())
            }
            Err(e) => {
                state.pending_abort = None;
                state.append_state = AppendState::WaitingForSegment;
                state.updating = None;
                drop(state);
                tracing::warn!("Buffer {} append failed: {}", id, e);
                self.emit(EventPayload::Error {
                    buffer: id,
                    message: e.to_string(),
                });
                self.emit(EventPayload::UpdateEnd { buffer: id });
                Err(e)
            }
        }
    }

    /// Request an abort of the in-flight append.
    ///
    /// The parse is not interrupted; the abort is applied at the next parser
    /// event or when the parse returns.
    pub(crate) fn request_abort(&self, mode: AbortMode) -> Result<()> {
        let mut state = self.inner.state.lock();
        match state.updating {
            None => Err(Error::state("abort while not updating")),
            Some(Operation::Remove) => Err(Error::state("cannot abort a remove")),
            Some(Operation::Append) => {
                if mode != AbortMode::None {
                    tracing::debug!("Buffer {} abort requested ({:?})", self.inner.id, mode);
                    state.pending_abort = Some(mode);
                }
                Ok(())
            }
        }
    }

    /// Take the `updating` gate for a remove of `[start, end)`.
    pub(crate) fn begin_remove(&self, start: f64, end: f64) -> Result<()> {
        if start.is_nan() || start < 0.0 || end.is_nan() || end <= start {
            return Err(Error::parameter(format!(
                "invalid remove range [{}, {})",
                start, end
            )));
        }
        {
            let mut state = self.inner.state.lock();
            if let Some(op) = state.updating {
                return Err(Error::state(format!("remove while {:?} is in progress", op)));
            }
            state.updating = Some(Operation::Remove);
            state.last_remove = Some((start, end));
        }
        self.emit(EventPayload::UpdateStart {
            buffer: self.inner.id,
        });
        Ok(())
    }

    pub(crate) fn run_remove(&self, start: f64, end: f64) -> Result<()> {
        let id = self.inner.id;
        let mut state = self.inner.state.lock();
        let result = state.remove_range(start, end);
        state.updating = None;
        drop(state);

        match result {
            Ok(()) => {
                tracing::debug!("Buffer {} removed [{:.3}, {:.3})", id, start, end);
                self.emit(EventPayload::Update { buffer: id });
                self.emit(EventPayload::UpdateEnd { buffer: id });
                Ok(())
            }
            Err(e) => {
                self.emit(EventPayload::Error {
                    buffer: id,
                    message: e.to_string(),
                });
                self.emit(EventPayload::UpdateEnd { buffer: id });
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SourceBuffer")
            .field("id", &self.inner.id)
            .field("mime_type", &self.inner.mime_type)
            .field("append_state", &state.append_state)
            .field("updating", &state.updating)
            .field("buffered", &state.buffered)
            .finish()
    }
}
