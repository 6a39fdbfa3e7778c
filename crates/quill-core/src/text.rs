//! Text utilities for model input and output.

use std::borrow::Cow;

/// Character cap applied to local-model input before encoding.
pub const LOCAL_INPUT_CHAR_LIMIT: usize = 1000;

/// Marker appended to truncated input.
pub const TRUNCATION_MARKER: &str = "...";

/// True for empty or whitespace-only input.
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Cut `text` to at most `max_chars` characters and append [`TRUNCATION_MARKER`].
///
/// This is lossy on purpose: the tail past the cap never reaches the model.
/// Counting is by `char`, so multi-byte text is never split mid-character.
pub fn truncate_input(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((byte_idx, _)) => {
            let mut cut = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            cut.push_str(&text[..byte_idx]);
            cut.push_str(TRUNCATION_MARKER);
            Cow::Owned(cut)
        }
    }
}

fn is_sentence_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Incremental sentence segmenter.
///
/// Text is fed in arbitrary fragments; every time a `.`, `!` or `?` is seen
/// the sentence up to and including it is released. Whatever follows the last
/// terminal stays buffered until [`SentenceSplitter::finish`]. Concatenating
/// everything released reproduces the input exactly.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    pending: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment, returning any sentences it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        let mut done = Vec::new();
        for c in fragment.chars() {
            self.pending.push(c);
            if is_sentence_terminal(c) {
                done.push(std::mem::take(&mut self.pending));
            }
        }
        done
    }

    /// Flush the trailing partial sentence, if any.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending)
        }
    }
}

/// Split a complete text into sentences.
pub fn segment_sentences(text: &str) -> Vec<String> {
    let mut splitter = SentenceSplitter::new();
    let mut sentences = splitter.push(text);
    sentences.extend(splitter.finish());
    sentences
}

/// Incremental UTF-8 decoder for byte pieces that may end mid-character.
///
/// An incomplete trailing sequence is held until the next push completes it.
/// Bytes that can never form a character are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the text they complete (possibly empty).
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is held; an unfinished character becomes U+FFFD.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}
