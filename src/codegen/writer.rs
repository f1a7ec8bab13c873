//! Indentation-aware source writer
//!
//! Lines starting with `BLOCK:` open a brace block, a line reading `END`
//! closes one.

const INDENT: &str = "    ";

/// Accumulates generated source text.
#[derive(Debug, Default, Clone)]
pub struct SourceWriter {
    buffer: String,
    level: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one line, or a block marker.
    pub fn write(&mut self, line: &str) {
        if let Some(header) = line.strip_prefix("BLOCK:") {
            self.line(&format!("{} {{", header));
            self.level += 1;
        } else if line == "END" {
            self.level = self.level.saturating_sub(1);
            self.line("}");
        } else {
            self.line(line);
        }
    }

    /// Write several lines separated by `\n`.
    pub fn write_lines(&mut self, text: &str) {
        for line in text.lines() {
            self.write(line);
        }
    }

    pub fn blank_line(&mut self) {
        self.buffer.push('\n');
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.level {
            self.buffer.push_str(INDENT);
        }
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    pub fn indent_level(&self) -> usize {
        self.level
    }

    pub fn code(&self) -> &str {
        &self.buffer
    }

    pub fn into_code(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_markers_map_to_braces() {
        let mut writer = SourceWriter::new();
        writer.write("BLOCK:fn build()");
        writer.write("let a = 1;");
        writer.write("BLOCK:if a > 0");
        writer.write("return a;");
        writer.write("END");
        writer.write("END");

        assert_eq!(
            writer.code(),
            "fn build() {\n    let a = 1;\n    if a > 0 {\n        return a;\n    }\n}\n"
        );
        assert_eq!(writer.indent_level(), 0);
    }

    #[test]
    fn test_unbalanced_end_does_not_underflow() {
        let mut writer = SourceWriter::new();
        writer.write("END");
        assert_eq!(writer.into_code(), "}\n");
    }
}
