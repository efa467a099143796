//! Terminal output decoding
//!
//! Turns raw child-process bytes into display lines: splits on line breaks
//! (including the bare carriage returns used by progress redraws), decodes
//! lossily as UTF-8 and strips ANSI/C1 control sequences.

use regex_lite::Regex;
use std::sync::OnceLock;

fn control_sequence_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // ESC or a C1 control, optional parameter/intermediate bytes, final byte
        Regex::new(r"(?:\x1B[@-_]|[\x{80}-\x{9F}])[0-?]*[ -/]*[@-~]")
            .expect("Invalid control sequence regex")
    })
}

/// Remove terminal control sequences from `text`
pub fn strip_control_sequences(text: &str) -> String {
    control_sequence_regex().replace_all(text, "").into_owned()
}

/// Incremental splitter for a raw output byte stream
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    /// Last byte consumed was a `\r`, so a following `\n` belongs to it
    after_cr: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every line completed by it
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in data {
            match byte {
                b'\n' if self.after_cr => {
                    self.after_cr = false;
                }
                b'\n' | b'\r' => {
                    lines.push(self.take_line());
                    self.after_cr = byte == b'\r';
                }
                _ => {
                    self.after_cr = false;
                    self.pending.push(byte);
                }
            }
        }

        lines
    }

    /// Flush a trailing unterminated line at end of stream
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        let raw = std::mem::take(&mut self.pending);
        strip_control_sequences(&String::from_utf8_lossy(&raw))
    }
}
