//! Pending product codes between scheduled runs.
//!
//! Idle → Populated (assign) → Draining (take) → Populated/Idle (finish)
//! and Cleared (clear) from any state. Duplicates are tolerated.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Populated,
    Draining,
    Cleared,
}

#[derive(Debug)]
pub struct JobQueue {
    codes: Vec<String>,
    state: QueueState,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            codes: Vec::new(),
            state: QueueState::Idle,
        }
    }

    /// Replace the queue with `codes`.
    pub fn assign(&mut self, codes: Vec<String>) {
        self.codes = codes;
        self.state = self.settled_state();
    }

    pub fn clear(&mut self) {
        self.codes.clear();
        self.state = QueueState::Cleared;
    }

    /// Move every queued code out for a drain cycle.
    pub fn take(&mut self) -> Vec<String> {
        self.state = QueueState::Draining;
        std::mem::take(&mut self.codes)
    }

    /// Queue a code for the next cycle.
    pub fn requeue(&mut self, code: impl Into<String>) {
        self.codes.push(code.into());
    }

    pub fn finish_drain(&mut self) {
        self.state = self.settled_state();
    }

    fn settled_state(&self) -> QueueState {
        if self.codes.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Populated
        }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }
}
