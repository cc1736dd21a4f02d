use std::collections::VecDeque;

/// Moving-average smoothing for accepted fix positions.
/// Only (lat, lng) are windowed; accuracy/speed/heading pass through untouched.
#[derive(Clone, Debug)]
pub struct PositionSmoother {
    window: VecDeque<(f64, f64)>,
    window_size: usize,
}

impl PositionSmoother {
    /// Create a new smoother with given window size (typically 5)
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        PositionSmoother {
            window: VecDeque::with_capacity(window_size + 1),
            window_size,
        }
    }

    /// Push a position and return the window mean (lat, lng)
    pub fn push(&mut self, latitude: f64, longitude: f64) -> (f64, f64) {
        self.window.push_back((latitude, longitude));

        // Evict oldest first
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        self.mean().unwrap_or((latitude, longitude))
    }

    /// Mean of the current window, None when empty
    pub fn mean(&self) -> Option<(f64, f64)> {
        if self.window.is_empty() {
            return None;
        }
        let n = self.window.len() as f64;
        let (sum_lat, sum_lng) = self
            .window
            .iter()
            .fold((0.0, 0.0), |acc, &(lat, lng)| (acc.0 + lat, acc.1 + lng));
        Some((sum_lat / n, sum_lng / n))
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Get current window size (actual, not max)
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Check if window is empty
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window_size
    }
}
