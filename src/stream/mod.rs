pub mod sse;

pub use sse::{frame_stream, split_frames, FrameSplitter, Frames, DONE_SENTINEL};

/// One event-stream unit before JSON decoding.
///
/// `event` is the value of the last `event:` line seen for the frame (absent
/// for bare `data:` streams). `data` is the newline-joined, trimmed payload of
/// its `data:` lines. Frames whose payload is empty or the `[DONE]` sentinel
/// are never produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    #[must_use]
    pub fn new(event: Option<&str>, data: &str) -> Self {
        Self {
            event: event.map(str::to_owned),
            data: data.to_owned(),
        }
    }

    /// Individual `data:` lines of a multi-line payload.
    pub fn data_lines(&self) -> impl Iterator<Item = &str> {
        self.data.split('\n')
    }

    #[must_use]
    pub fn is_multi_line(&self) -> bool {
        memchr::memchr(b'\n', self.data.as_bytes()).is_some()
    }
}
