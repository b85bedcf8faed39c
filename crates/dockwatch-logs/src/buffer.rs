use std::collections::VecDeque;

/// Default number of lines kept per source
pub const DEFAULT_CONTEXT_LINES: usize = 10;

/// Fixed-capacity ring of the most recent raw lines of one source
#[derive(Clone, Debug)]
pub struct ContextRing {
    /// Internal storage, oldest first
    lines: VecDeque<String>,

    /// Maximum capacity
    capacity: usize,
}

impl ContextRing {
    /// Create a new ring with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a line, evicting the oldest if at capacity
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Ordered copy of the buffered lines (oldest to newest)
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear all lines
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for ContextRing {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LINES)
    }
}
