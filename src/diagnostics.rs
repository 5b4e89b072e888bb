/// Where compile-time and runtime errors are reported: a thin sink so the
/// CLI can print to stderr while tests capture the same messages in memory.
pub trait Diagnostics {
    fn error(&mut self, line: usize, message: &str);
}

pub struct CliDiagnostics;

impl Diagnostics for CliDiagnostics {
    fn error(&mut self, line: usize, message: &str) {
        eprintln!("[line {line}] Error: {message}");
    }
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    pub messages: Vec<(usize, String)>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn error(&mut self, line: usize, message: &str) {
        self.messages.push((line, message.to_string()));
    }
}
