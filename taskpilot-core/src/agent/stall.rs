use std::collections::VecDeque;

/// Trailing window of the step descriptions a loop attempted.
///
/// Matching is exact: differently worded repeats are not a stall.
#[derive(Debug, Clone)]
pub struct StallDetector {
    window: VecDeque<String>,
    threshold: usize,
}

impl StallDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(threshold),
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Called before attempting `description`. Returns true when the full
    /// window already holds `description` in every slot; the window is then
    /// cleared. Otherwise the attempt is recorded.
    pub fn check(&mut self, description: &str) -> bool {
        if self.threshold == 0 {
            return false;
        }

        let stalled =
            self.window.len() >= self.threshold && self.window.iter().all(|d| d == description);
        if stalled {
            self.window.clear();
            return true;
        }

        self.window.push_back(description.to_string());
        while self.window.len() > self.threshold {
            self.window.pop_front();
        }
        false
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
