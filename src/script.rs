/// Line-oriented text buffer for the generated scripts
#[derive(Debug, Default)]
pub struct Script {
    text: String,
}

impl Script {
    pub fn new() -> Script {
        Script::default()
    }

    /// Appends `line` followed by a newline
    pub fn line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    pub fn finish(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_line_is_newline_terminated() {
        let mut script = Script::new();
        script.line("// header");
        script.blank();
        script.line(format!("Box({}) = {{ 0 }};", 1));
        assert_eq!(script.finish(), "// header\n\nBox(1) = { 0 };\n");
    }

    #[test]
    fn empty_script_is_empty() {
        assert_eq!(Script::new().finish(), "");
    }
}
