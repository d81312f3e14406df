use rand::{Rng, SeedableRng, rngs::StdRng};

/// Draws zero-mean Gaussian noise via Box-Muller.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * std_dev
}

/// Uncontrolled building load: a daily sinusoid plus Gaussian noise.
///
/// # Examples
///
/// ```
/// use load_curtail::sim::baseload::BaseLoad;
///
/// let mut load = BaseLoad::new(80.0, 10.0, 0.0, 0.0, 24, 42);
/// assert!((load.demand_kw(6) - 90.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct BaseLoad {
    /// Mean demand (kW).
    pub base_kw: f64,
    /// Amplitude of the daily variation (kW).
    pub amp_kw: f64,
    /// Phase offset of the daily pattern (radians).
    pub phase_rad: f64,
    /// Standard deviation of the noise (kW).
    pub noise_std: f64,
    pub steps_per_day: usize,
    rng: StdRng,
}

impl BaseLoad {
    /// Creates a new baseload generator.
    ///
    /// # Arguments
    ///
    /// * `base_kw` - Mean demand in kilowatts
    /// * `amp_kw` - Amplitude of the daily sinusoid in kilowatts
    /// * `phase_rad` - Phase offset in radians
    /// * `noise_std` - Standard deviation of the noise in kilowatts
    /// * `steps_per_day` - Steps in one period of the sinusoid
    /// * `seed` - Random seed for reproducible noise
    pub fn new(
        base_kw: f64,
        amp_kw: f64,
        phase_rad: f64,
        noise_std: f64,
        steps_per_day: usize,
        seed: u64,
    ) -> Self {
        Self {
            base_kw,
            amp_kw,
            phase_rad,
            noise_std,
            steps_per_day: steps_per_day.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Demand at `step`, never negative.
    pub fn demand_kw(&mut self, step: usize) -> f64 {
        let day_pos = (step % self.steps_per_day) as f64 / self.steps_per_day as f64;
        let angle = 2.0 * std::f64::consts::PI * day_pos + self.phase_rad;
        let noise = gaussian_noise(&mut self.rng, self.noise_std);
        (self.base_kw + self.amp_kw * angle.sin() + noise).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noiseless_load_follows_sinusoid() {
        let mut load = BaseLoad::new(10.0, 2.0, 0.0, 0.0, 4, 1);
        let values: Vec<f64> = (0..4).map(|t| load.demand_kw(t)).collect();
        assert!((values[0] - 10.0).abs() < 1e-9);
        assert!((values[1] - 12.0).abs() < 1e-9);
        assert!((values[3] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_noise() {
        let mut a = BaseLoad::new(10.0, 0.0, 0.0, 1.0, 24, 7);
        let mut b = BaseLoad::new(10.0, 0.0, 0.0, 1.0, 24, 7);
        for t in 0..24 {
            assert_eq!(a.demand_kw(t), b.demand_kw(t));
        }
    }

    #[test]
    fn demand_is_never_negative() {
        let mut load = BaseLoad::new(0.0, 5.0, 0.0, 3.0, 24, 3);
        assert!((0..200).all(|t| load.demand_kw(t) >= 0.0));
    }
}
