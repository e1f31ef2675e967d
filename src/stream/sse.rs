/// Event-stream frame splitter.
///
/// Turns raw `event:`/`data:` text into [`Frame`]s. Accepts the whole text at
/// once, chunks split at arbitrary byte boundaries, individual lines, or an
/// async byte stream. Streams that omit the blank line between events are
/// recovered: an `event:` line always closes the frame that precedes it.
use super::Frame;
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

/// Payload that marks the end of a stream. Never decoded.
pub const DONE_SENTINEL: &str = "[DONE]";

struct PendingFrames {
    frames: SmallVec<[Frame; 4]>,
    head: usize,
}

impl PendingFrames {
    #[inline]
    fn new() -> Self {
        Self {
            frames: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Frame> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::take(&mut self.frames[self.head]);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<Frame>) {
        if parsed.is_empty() {
            return;
        }
        self.frames.reserve(parsed.len());
        self.frames.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// FrameSplitter: incremental line splitter
// ---------------------------------------------------------------------------

/// Incremental frame splitter.
///
/// Feed it raw text and it yields fully-assembled [`Frame`]s. Call
/// [`FrameSplitter::finish_into`] once input is exhausted to flush a trailing
/// frame that was never terminated by a blank line.
pub struct FrameSplitter {
    buffer: String,
    read_offset: usize,
    pending: PendingFrame,
}

#[derive(Default)]
struct PendingFrame {
    event_name: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl FrameSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            pending: PendingFrame::default(),
        }
    }

    /// Feed raw text and return any complete frames.
    ///
    /// Line rules:
    /// - `event:` closes any frame in progress, then names the next one
    /// - `data:` appends to the data buffer (one leading space stripped),
    ///   consecutive lines joined with `\n`
    /// - a blank (or whitespace-only) line closes the frame
    /// - `:` comments and any other field are ignored
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete frames into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<Frame>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            self.pending.push_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Process one complete line (without its terminator).
    ///
    /// Must not be mixed with a partially fed chunk that is still buffered.
    pub fn push_line(&mut self, line: &str, out: &mut Vec<Frame>) {
        self.pending.push_line(line, out);
    }

    /// Flush whatever is buffered, including an unterminated last line.
    pub fn finish_into(&mut self, out: &mut Vec<Frame>) {
        if self.read_offset < self.buffer.len() {
            self.pending.push_line(&self.buffer[self.read_offset..], out);
        }
        self.buffer.clear();
        self.read_offset = 0;
        self.pending.flush(out);
    }

    #[must_use]
    pub fn finish(mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        self.finish_into(&mut out);
        out
    }
}

impl PendingFrame {
    fn push_line(&mut self, line: &str, out: &mut Vec<Frame>) {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            self.flush(out);
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.has_data {
                self.data_buffer.push('\n');
            } else {
                self.has_data = true;
            }
            self.data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            // Some dumps never emit the blank separator between events.
            if self.event_name.is_some() || self.has_data {
                self.flush(out);
            }
            let value = value.trim();
            self.event_name = (!value.is_empty()).then(|| value.to_owned());
        }
        // `id:`, `retry:` and unknown fields carry nothing the aggregator uses.
    }

    fn flush(&mut self, out: &mut Vec<Frame>) {
        let event = self.event_name.take();
        if !self.has_data {
            return;
        }
        self.has_data = false;
        let data = std::mem::take(&mut self.data_buffer);
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == DONE_SENTINEL {
            return;
        }
        let data = if trimmed.len() == data.len() {
            data
        } else {
            trimmed.to_owned()
        };
        out.push(Frame { event, data });
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Frames: lazy iterator over fully-buffered text
// ---------------------------------------------------------------------------

/// Lazy iterator over the frames of fully-buffered text.
///
/// Produced by [`split_frames`]. Restartable only by calling it again.
pub struct Frames<'a> {
    rest: Option<&'a str>,
    splitter: FrameSplitter,
    scratch: Vec<Frame>,
    pending: PendingFrames,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            let rest = self.rest?;
            match memchr::memchr(b'\n', rest.as_bytes()) {
                Some(pos) => {
                    self.rest = Some(&rest[pos + 1..]);
                    self.splitter.push_line(&rest[..pos], &mut self.scratch);
                }
                None => {
                    self.rest = None;
                    self.splitter.push_line(rest, &mut self.scratch);
                    self.splitter.finish_into(&mut self.scratch);
                }
            }
            self.pending.extend_from_vec(&mut self.scratch);
        }
    }
}

/// Split fully-buffered event-stream text into frames, lazily.
#[must_use]
pub fn split_frames(text: &str) -> Frames<'_> {
    Frames {
        rest: Some(text),
        splitter: FrameSplitter::new(),
        scratch: Vec::with_capacity(2),
        pending: PendingFrames::new(),
    }
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Feed as much of `remainder` as is valid UTF-8, keeping an incomplete
/// trailing sequence for the next chunk. Invalid sequences become U+FFFD.
fn feed_utf8(remainder: &mut Vec<u8>, splitter: &mut FrameSplitter, out: &mut Vec<Frame>) {
    loop {
        match std::str::from_utf8(remainder) {
            Ok(text) => {
                splitter.feed_into(text, out);
                remainder.clear();
                return;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&remainder[..valid_up_to]) {
                    splitter.feed_into(text, out);
                }
                match err.error_len() {
                    Some(bad_len) => {
                        splitter.feed_into("\u{FFFD}", out);
                        remainder.drain(..valid_up_to + bad_len);
                    }
                    None => {
                        remainder.drain(..valid_up_to);
                        return;
                    }
                }
            }
        }
    }
}

/// Split a byte stream into frames using [`FrameSplitter`].
///
/// Chunks arriving from a reader or HTTP body are decoded as UTF-8 (sequences
/// split across chunks are stitched back together), fed into the splitter, and
/// complete frames are yielded in arrival order. The trailing frame is flushed
/// when the source ends. The first source error is yielded and ends the stream.
pub fn frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Frame, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            Some(FrameSplitter::new()),
            Vec::<u8>::new(),
            Vec::<Frame>::with_capacity(8),
            PendingFrames::new(),
        ),
        |(mut stream, mut splitter, mut remainder, mut parsed, mut pending)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (stream, splitter, remainder, parsed, pending)));
                }
                let active = splitter.as_mut()?;

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        remainder.extend_from_slice(&bytes);
                        feed_utf8(&mut remainder, active, &mut parsed);
                    }
                    Some(Err(err)) => {
                        splitter = None;
                        return Some((Err(err), (stream, splitter, remainder, parsed, pending)));
                    }
                    None => {
                        if !remainder.is_empty() {
                            let tail = String::from_utf8_lossy(&remainder).into_owned();
                            active.feed_into(&tail, &mut parsed);
                            remainder.clear();
                        }
                        active.finish_into(&mut parsed);
                        splitter = None;
                    }
                }
                pending.extend_from_vec(&mut parsed);
            }
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
