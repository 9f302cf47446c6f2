//! Depth-supervision weighting.

/// Linear anneal of the depth-supervision weight from 1.0 down to `floor`
/// over the first `anneal_steps` steps, held at `floor` afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSupervisionSchedule {
    pub anneal_steps: u32,
    pub floor: f32,
}

impl DepthSupervisionSchedule {
    pub fn new(anneal_steps: u32, floor: f32) -> Self {
        Self {
            anneal_steps,
            floor,
        }
    }

    /// `max(1 - step / anneal_steps, floor)`
    pub fn weight(&self, step: u32) -> f32 {
        if step >= self.anneal_steps {
            return self.floor;
        }
        let progress = step as f64 / self.anneal_steps as f64;
        ((1.0 - progress) as f32).max(self.floor)
    }
}

impl Default for DepthSupervisionSchedule {
    fn default() -> Self {
        Self::new(2000, 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_endpoints() {
        let schedule = DepthSupervisionSchedule::default();
        assert_eq!(schedule.weight(0), 1.0);
        assert_eq!(schedule.weight(1000), 0.5);
        assert_eq!(schedule.weight(1600), 0.2);
        assert_eq!(schedule.weight(2000), 0.2);
        assert_eq!(schedule.weight(50_000), 0.2);
    }

    #[test]
    fn test_weight_monotonic_and_bounded() {
        let schedule = DepthSupervisionSchedule::default();
        let mut previous = schedule.weight(0);
        for step in 1..5000 {
            let w = schedule.weight(step);
            assert!(w <= previous, "weight rose at step {step}");
            assert!(w >= 0.2);
            previous = w;
        }
    }
}
