/// Per-stream capture limits.
///
/// Once a stream's buffer grows past `max_bytes`, everything but the most
/// recent `retained_bytes` is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_bytes: usize,
    pub retained_bytes: usize,
}

impl OutputLimits {
    pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;
    pub const DEFAULT_RETAINED_BYTES: usize = 5 * 1024 * 1024;

    /// `retained_bytes` is clamped to `max_bytes`.
    pub fn new(max_bytes: usize, retained_bytes: usize) -> Self {
        Self {
            max_bytes,
            retained_bytes: retained_bytes.min(max_bytes),
        }
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BYTES, Self::DEFAULT_RETAINED_BYTES)
    }
}

/// Byte buffer that keeps the tail of a stream.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: Vec<u8>,
    limits: OutputLimits,
    discarded: u64,
}

impl TailBuffer {
    pub fn new(limits: OutputLimits) -> Self {
        Self {
            buf: Vec::new(),
            limits,
            discarded: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.limits.max_bytes {
            let excess = self.buf.len() - self.limits.retained_bytes;
            self.buf.drain(..excess);
            self.discarded += excess as u64;
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes dropped from the front so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take the captured bytes as text, leaving the buffer empty.
    /// A cut through a multi-byte character decodes lossily.
    pub fn take_string(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}
