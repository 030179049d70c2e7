/// Log text capped at a fixed number of bytes
///
/// Build and container output is untrusted and can be arbitrarily large.
/// Once the cap is reached further input is dropped and a single marker
/// line is appended.
pub const DEFAULT_LOG_CAP: usize = 1024 * 1024;

const TRUNCATED_MARKER: &str = "\n[output truncated]\n";

#[derive(Debug, Clone)]
pub struct LogBuffer {
    buf: String,
    cap: usize,
    truncated: bool,
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
            truncated: false,
        }
    }

    pub fn push_str(&mut self, s: &str) {
        if self.truncated {
            return;
        }
        let room = self.cap.saturating_sub(self.buf.len());
        if s.len() <= room {
            self.buf.push_str(s);
            return;
        }

        let mut end = room;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
        self.buf.push_str(TRUNCATED_MARKER);
        self.truncated = true;
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.push_str(&String::from_utf8_lossy(bytes));
    }

    pub fn push_line(&mut self, line: &str) {
        self.push_str(line);
        if !line.ends_with('\n') {
            self.push_str("\n");
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_cap_keeps_everything() {
        let mut logs = LogBuffer::new(64);
        logs.push_line("Step 1/5 : FROM node:20-slim");
        logs.push_str("ok\n");
        assert_eq!(logs.as_str(), "Step 1/5 : FROM node:20-slim\nok\n");
        assert!(!logs.is_truncated());
    }

    #[test]
    fn test_cap_truncates_once() {
        let mut logs = LogBuffer::new(8);
        logs.push_str("0123456789");
        logs.push_str("more");
        assert!(logs.is_truncated());
        assert!(logs.as_str().starts_with("01234567"));
        assert_eq!(logs.as_str().matches("[output truncated]").count(), 1);
        assert!(!logs.as_str().contains("more"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut logs = LogBuffer::new(3);
        logs.push_str("héllo");
        assert!(logs.as_str().starts_with("hé"));
    }
}
