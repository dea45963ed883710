//! Randomized inter-request delays.

use std::time::Duration;

use rand::Rng;

/// Half-open interval `[min, max)` for sampled delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::from_secs_f64(1.0, 5.0)
    }
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Build from seconds; negative or non-finite bounds clamp to zero.
    pub fn from_secs_f64(min: f64, max: f64) -> Self {
        Self {
            min: secs(min),
            max: secs(max),
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Sample a duration. A degenerate range yields `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let secs = rng.random_range(self.min.as_secs_f64()..self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Sleep for a duration sampled from `range`. Returns the slept duration.
pub async fn random_delay<R: Rng + ?Sized>(rng: &mut R, range: DelayRange) -> Duration {
    let delay = range.sample(rng);
    if !delay.is_zero() {
        tracing::debug!("Adding random delay of {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_samples_stay_in_range() {
        let range = DelayRange::from_secs_f64(1.0, 5.0);
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..500 {
            let d = range.sample(&mut rng);
            assert!(d >= Duration::from_secs(1));
            assert!(d < Duration::from_secs(5));
        }
    }

    #[test]
    fn test_degenerate_range_returns_min() {
        let mut rng = StdRng::seed_from_u64(0);
        let range = DelayRange::from_secs_f64(3.0, 2.0);
        assert_eq!(range.sample(&mut rng), Duration::from_secs(3));
        assert_eq!(DelayRange::none().sample(&mut rng), Duration::ZERO);
        assert_eq!(
            DelayRange::from_secs_f64(-1.0, f64::NAN),
            DelayRange::none()
        );
    }

    #[tokio::test]
    async fn test_random_delay_sleeps_sampled_duration() {
        let mut rng = StdRng::seed_from_u64(5);
        let range = DelayRange::from_secs_f64(0.01, 0.02);
        let start = std::time::Instant::now();
        let slept = random_delay(&mut rng, range).await;
        assert!(start.elapsed() >= slept);
        assert!(slept >= Duration::from_millis(10));
    }
}
