//! Nested XML-like trace of a box tree, for humans only.

use super::BoxType;
use std::fmt::Write;

/// Accumulates an indented trace.
#[derive(Debug, Default)]
pub struct DumpWriter {
    out: String,
    depth: usize,
    max_string_len: Option<usize>,
}

impl DumpWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate string attributes longer than `max` characters.
    pub fn with_max_string_len(max: usize) -> Self {
        Self {
            max_string_len: Some(max),
            ..Self::default()
        }
    }

    /// Open an element named `name` and emit the standard box info line.
    pub fn begin_box(&mut self, name: &str, box_type: BoxType, size: u64, attrs: &[(&str, String)]) {
        self.open(name, attrs);
        self.leaf(
            "BoxInfo",
            &[("Size", size.to_string()), ("Type", box_type.to_string())],
        );
    }

    pub fn end_box(&mut self, name: &str) {
        self.close(name);
    }

    pub fn open(&mut self, name: &str, attrs: &[(&str, String)]) {
        self.indent();
        let _ = write!(self.out, "<{}", name);
        self.write_attrs(attrs);
        self.out.push_str(">\n");
        self.depth += 1;
    }

    pub fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        let _ = writeln!(self.out, "</{}>", name);
    }

    pub fn leaf(&mut self, name: &str, attrs: &[(&str, String)]) {
        self.indent();
        let _ = write!(self.out, "<{}", name);
        self.write_attrs(attrs);
        self.out.push_str("/>\n");
    }

    /// Render raw text bytes as an attribute value, applying truncation.
    pub fn text(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        match self.max_string_len {
            Some(max) if text.chars().count() > max => {
                let cut: String = text.chars().take(max).collect();
                format!("{}...", cut)
            }
            _ => text.into_owned(),
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn write_attrs(&mut self, attrs: &[(&str, String)]) {
        for (key, value) in attrs {
            let _ = write!(self.out, " {}=\"{}\"", key, escape(value));
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_output() {
        let mut w = DumpWriter::new();
        w.begin_box("WebVTTCueBox", BoxType::VTCU, 31, &[]);
        w.leaf("StringBox", &[("string", "a < b".to_string())]);
        w.end_box("WebVTTCueBox");
        let out = w.finish();
        assert_eq!(
            out,
            "<WebVTTCueBox>\n  <BoxInfo Size=\"31\" Type=\"vtcu\"/>\n  <StringBox string=\"a &lt; b\"/>\n</WebVTTCueBox>\n"
        );
    }

    #[test]
    fn test_text_truncation() {
        let w = DumpWriter::with_max_string_len(4);
        assert_eq!(w.text(b"abcdefgh"), "abcd...");
        assert_eq!(w.text(b"abc"), "abc");
    }
}
