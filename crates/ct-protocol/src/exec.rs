//! Sentinel framing for single-command execution
//!
//! The remote end is a bare shell stream with no notion of where one
//! command's output begins or ends. The client wraps the command in two
//! echoes of a marker and recovers the output by locating the echoed markers
//! in the incoming byte stream:
//!
//! ```text
//! echo <marker>; <command>; echo; echo <marker>; exit
//! ```
//!
//! A marker occurrence only counts when it sits on its own line (preceded by
//! a line start or followed by a line end). Occurrences inside the echoed
//! command line itself are followed by `;` and preceded by `echo `, so they
//! are skipped even when the remote shell still echoes input.

/// Command sent before the payload to stop the remote shell echoing input
pub const DISABLE_ECHO: &str = "stty -echo\n";

const MARKER_PREFIX: &str = "__CT_EXEC_";

/// Generate a marker that will not collide with ordinary output
pub fn generate_marker() -> String {
    format!("{}{:016x}__", MARKER_PREFIX, rand::random::<u64>())
}

/// Build the shell line that frames `command` between two marker echoes
pub fn exec_payload(marker: &str, command: &str) -> String {
    format!("echo {marker}; {command}; echo; echo {marker}; exit\n")
}

/// Accumulates the inbound stream and extracts the text between markers
///
/// Line endings are normalized (`\r\n` becomes `\n`) as bytes arrive, with a
/// trailing `\r` held back until the next chunk shows whether it starts a
/// `\r\n` pair. Extraction does not depend on how the stream was chunked.
#[derive(Debug)]
pub struct MarkerScanner {
    marker: Vec<u8>,
    buf: Vec<u8>,
    pending_cr: bool,
    /// Offset from which the next marker search starts
    scanned: usize,
    /// End offsets (exclusive) and start offsets of counted markers
    found: Vec<(usize, usize)>,
    eof: bool,
    complete: bool,
}

impl MarkerScanner {
    /// Create a scanner for the given marker
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.as_bytes().to_vec(),
            buf: Vec::with_capacity(4096),
            pending_cr: false,
            scanned: 0,
            found: Vec::with_capacity(2),
            eof: false,
            complete: false,
        }
    }

    /// Number of bytes accumulated so far (after normalization)
    pub fn len(&self) -> usize {
        self.buf.len() + usize::from(self.pending_cr)
    }

    /// True when nothing has been accumulated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both markers have been seen
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed a chunk of inbound bytes
    ///
    /// Returns the extracted output the first time both markers have been
    /// seen, and `None` otherwise.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        if self.complete {
            return None;
        }

        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.buf.push(b'\n');
                    continue;
                }
                self.buf.push(b'\r');
            }

            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                self.buf.push(byte);
            }
        }

        self.scan()
    }

    /// Consume the scanner once the stream has ended
    ///
    /// Returns the complete output when both markers were seen, everything
    /// after the start marker when only one was seen, and an empty string
    /// when no marker arrived at all.
    pub fn finish(mut self) -> String {
        // A carriage return that ends the stream is a line end
        if self.pending_cr {
            self.pending_cr = false;
            self.buf.push(b'\n');
        }
        self.eof = true;

        if self.complete {
            return self.between_markers();
        }
        if let Some(output) = self.scan() {
            return output;
        }

        match self.found.first() {
            Some(&(_, start_end)) => trimmed(&self.buf[start_end..]),
            None => {
                if !self.buf.is_empty() {
                    tracing::warn!(
                        bytes = self.buf.len(),
                        "Stream ended before the start marker arrived"
                    );
                }
                String::new()
            }
        }
    }

    fn scan(&mut self) -> Option<String> {
        let marker_len = self.marker.len();
        if marker_len == 0 || self.complete {
            return None;
        }

        while self.found.len() < 2 {
            let Some(rel) = find(&self.buf[self.scanned..], &self.marker) else {
                // Keep enough tail to match a marker split across chunks
                let tail = self.buf.len().saturating_sub(marker_len - 1);
                self.scanned = self.scanned.max(tail);
                return None;
            };

            let start = self.scanned + rel;
            let end = start + marker_len;
            let at_line_start = start == 0 || self.buf[start - 1] == b'\n';

            if !at_line_start {
                match self.buf.get(end) {
                    None if self.eof => {}
                    None => {
                        // Next byte decides whether this occurrence counts
                        self.scanned = start;
                        return None;
                    }
                    Some(b'\n') => {}
                    Some(_) => {
                        self.scanned = start + 1;
                        continue;
                    }
                }
            }

            self.found.push((start, end));
            self.scanned = end;
        }

        self.complete = true;
        Some(self.between_markers())
    }

    fn between_markers(&self) -> String {
        let (_, first_end) = self.found[0];
        let (second_start, _) = self.found[1];
        trimmed(&self.buf[first_end..second_start])
    }
}

fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
