//! Incremental UTF-8 decoding for PTY output.
//!
//! A read can end in the middle of a multi-byte character. The incomplete
//! tail is held back and prefixed to the next chunk so the UI never sees a
//! replacement character for a sequence that was merely split.

/// Longest possible incomplete UTF-8 sequence.
const MAX_PENDING: usize = 3;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid_up_to + len..];
                        }
                        None => {
                            rest = &rest[valid_up_to..];
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        debug_assert!(tail.len() <= MAX_PENDING);
        self.pending = tail;
        out
    }

    /// Flush whatever is still held back, lossily.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
