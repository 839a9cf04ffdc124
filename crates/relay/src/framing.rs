//! Newline framing for client sockets.

/// One complete input line, or the marker for one that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// More than the frame limit arrived without a newline. The bytes were dropped.
    Oversized,
    /// A complete line that is not valid UTF-8.
    InvalidUtf8,
}

/// Growable receive buffer that yields complete lines.
///
/// Lines are trimmed, so `\r\n` endings work and blank lines are skipped. Once a partial
/// line exceeds `max_frame`, everything up to the next newline is discarded.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    max_frame: usize,
    discarding: bool,
}

impl FrameBuffer {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
            discarding: false,
        }
    }

    /// Append bytes and return every frame they complete.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(pos) = bytes.iter().position(|&b| b == b'\n') {
            let (head, rest) = bytes.split_at(pos);
            bytes = &rest[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            if self.buffer.len() > self.max_frame {
                self.buffer.clear();
                frames.push(Frame::Oversized);
                continue;
            }
            if let Some(frame) = self.take_line() {
                frames.push(frame);
            }
        }

        if self.discarding {
            return frames;
        }
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > self.max_frame {
            self.buffer.clear();
            self.discarding = true;
            frames.push(Frame::Oversized);
        }
        frames
    }

    /// Bytes held for an incomplete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> Option<Frame> {
        let bytes = std::mem::take(&mut self.buffer);
        let Ok(line) = String::from_utf8(bytes) else {
            return Some(Frame::InvalidUtf8);
        };
        let line = line.trim();
        (!line.is_empty()).then(|| Frame::Line(line.to_string()))
    }
}
