/// Converts raw scroll-driven growth of the max post number into discrete
/// page units. A page unit here is an engine-internal progress measure, not
/// anything the origin paginates by.
#[derive(Debug)]
pub struct PaginationTracker {
    grow_threshold: u32,
    last_max_seen: u32,
    pages_total: u32,
}

impl PaginationTracker {
    pub fn new(grow_threshold: u32, initial_max: u32) -> Self {
        Self {
            grow_threshold: grow_threshold.max(1),
            last_max_seen: initial_max,
            pages_total: 0,
        }
    }

    /// Records the current max post number and returns how many page units
    /// that growth amounts to. Advances `last_max_seen` only when at least
    /// one full unit accrued, so sub-threshold growth keeps accumulating.
    pub fn record_growth(&mut self, current_max: u32) -> u32 {
        if current_max <= self.last_max_seen {
            return 0;
        }
        let advanced = (current_max - self.last_max_seen) / self.grow_threshold;
        if advanced >= 1 {
            self.last_max_seen = current_max;
            self.pages_total += advanced;
        }
        advanced
    }

    pub fn last_max_seen(&self) -> u32 {
        self.last_max_seen
    }

    pub fn pages_total(&self) -> u32 {
        self.pages_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_threshold_growth_advances_nothing() {
        let mut tracker = PaginationTracker::new(10, 4);
        assert_eq!(tracker.record_growth(13), 0);
        assert_eq!(tracker.last_max_seen(), 4);
        assert_eq!(tracker.pages_total(), 0);
    }

    #[test]
    fn growth_yields_floor_of_quotient() {
        let mut tracker = PaginationTracker::new(10, 0);
        assert_eq!(tracker.record_growth(25), 2);
        assert_eq!(tracker.last_max_seen(), 25);
        assert_eq!(tracker.pages_total(), 2);
    }

    #[test]
    fn repeated_same_max_is_idempotent() {
        let mut tracker = PaginationTracker::new(10, 4);
        assert_eq!(tracker.record_growth(15), 1);
        assert_eq!(tracker.record_growth(15), 0);
        assert_eq!(tracker.record_growth(15), 0);
        assert_eq!(tracker.pages_total(), 1);
    }

    #[test]
    fn regression_in_max_is_ignored() {
        let mut tracker = PaginationTracker::new(10, 30);
        assert_eq!(tracker.record_growth(12), 0);
        assert_eq!(tracker.last_max_seen(), 30);
    }

    #[test]
    fn accumulated_sub_threshold_growth_eventually_counts() {
        let mut tracker = PaginationTracker::new(10, 0);
        assert_eq!(tracker.record_growth(6), 0);
        assert_eq!(tracker.record_growth(11), 1);
        assert_eq!(tracker.last_max_seen(), 11);
    }
}
