#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
}

/// Bounded log sink for one sandbox run. Lines past `max_lines` are counted
/// and dropped; long lines are cut at `max_line_chars`.
#[derive(Debug)]
pub struct LogCapture {
    lines: Vec<LogLine>,
    dropped: usize,
    max_lines: usize,
    max_line_chars: usize,
}

impl LogCapture {
    pub fn new(max_lines: usize, max_line_chars: usize) -> Self {
        Self {
            lines: Vec::new(),
            dropped: 0,
            max_lines,
            max_line_chars,
        }
    }

    pub fn push(&mut self, level: LogLevel, text: &str) {
        if self.lines.len() >= self.max_lines {
            self.dropped += 1;
            return;
        }
        let text = if text.chars().count() > self.max_line_chars {
            let mut cut: String = text.chars().take(self.max_line_chars).collect();
            cut.push_str("...");
            cut
        } else {
            text.to_string()
        };
        self.lines.push(LogLine { level, text });
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Stdout lines, then `=> <value>`, then the `[stderr]` block.
    pub fn render(&self, return_value: Option<&str>) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut stderr: Vec<&str> = Vec::new();

        for line in &self.lines {
            match line.level {
                LogLevel::Info | LogLevel::Debug => out.push(line.text.clone()),
                LogLevel::Warn => out.push(format!("[warn] {}", line.text)),
                LogLevel::Error => stderr.push(&line.text),
            }
        }

        if self.dropped > 0 {
            out.push(format!("... ({} more lines truncated)", self.dropped));
        }

        if let Some(value) = return_value.filter(|v| !v.is_empty()) {
            out.push(format!("=> {}", value));
        }

        if !stderr.is_empty() {
            out.push(format!("[stderr]\n{}", stderr.join("\n")));
        }

        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_order() {
        let mut capture = LogCapture::new(10, 100);
        capture.push(LogLevel::Info, "hello");
        capture.push(LogLevel::Error, "bad thing");
        capture.push(LogLevel::Warn, "careful");

        let rendered = capture.render(Some("42"));
        assert_eq!(rendered, "hello\n[warn] careful\n=> 42\n[stderr]\nbad thing");
    }

    #[test]
    fn test_empty_return_value_omitted() {
        let mut capture = LogCapture::new(10, 100);
        capture.push(LogLevel::Info, "only");
        assert_eq!(capture.render(Some("")), "only");
        assert_eq!(capture.render(None), "only");
    }

    #[test]
    fn test_line_cap_and_truncation_marker() {
        let mut capture = LogCapture::new(2, 100);
        for i in 0..5 {
            capture.push(LogLevel::Info, &format!("line {}", i));
        }
        assert_eq!(capture.lines().len(), 2);
        assert_eq!(capture.dropped(), 3);
        assert!(capture.render(None).ends_with("... (3 more lines truncated)"));
    }

    #[test]
    fn test_long_line_cut() {
        let mut capture = LogCapture::new(10, 4);
        capture.push(LogLevel::Info, "abcdefgh");
        assert_eq!(capture.lines()[0].text, "abcd...");
    }
}
