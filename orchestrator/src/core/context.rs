//! Rolling context fed into each executor prompt.

/// Accumulated outputs of completed tasks, in ascending `order_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollingContext {
    buf: String,
}

impl RollingContext {
    /// Append one task's output behind a separator line.
    pub fn push(&mut self, order_index: i64, output: &str) {
        self.buf.push_str("\n---\nTask ");
        self.buf.push_str(&order_index.to_string());
        self.buf.push_str(" Output:\n");
        self.buf.push_str(output);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}
