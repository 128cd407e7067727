/// Appended once when a stream hits its byte ceiling.
pub const TRUNCATION_MARKER: &str = "\n...[output truncated]";

/// Captured stdout/stderr with a shared byte ceiling per stream.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    stdout: String,
    stderr: String,
    limit: usize,
    stdout_truncated: bool,
    stderr_truncated: bool,
}

impl OutputCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            limit,
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    pub fn write_stdout(&mut self, text: &str) {
        append_bounded(&mut self.stdout, &mut self.stdout_truncated, text, self.limit);
    }

    pub fn write_stderr(&mut self, text: &str) {
        append_bounded(&mut self.stderr, &mut self.stderr_truncated, text, self.limit);
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

fn append_bounded(buf: &mut String, truncated: &mut bool, text: &str, limit: usize) {
    if *truncated {
        return;
    }
    let room = limit.saturating_sub(buf.len());
    if text.len() <= room {
        buf.push_str(text);
        return;
    }
    let mut cut = room;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.push_str(&text[..cut]);
    buf.push_str(TRUNCATION_MARKER);
    *truncated = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_under_limit_is_kept() {
        let mut out = OutputCapture::new(16);
        out.write_stdout("hello\n");
        assert_eq!(out.stdout(), "hello\n");
        assert!(!out.is_truncated());
    }

    #[test]
    fn output_over_limit_gets_marker_once() {
        let mut out = OutputCapture::new(8);
        out.write_stdout("0123456789");
        out.write_stdout("more");
        assert_eq!(out.stdout(), format!("01234567{}", TRUNCATION_MARKER));
        assert!(out.is_truncated());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut out = OutputCapture::new(3);
        out.write_stderr("héllo");
        assert!(out.stderr().starts_with("hé"));
    }
}
