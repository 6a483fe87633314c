//! Dual time-constant exponential smoothing.

/// Two EMAs over the same signal: a fast one that follows spikes and a slow
/// one that holds the trend. The output leans toward the fast average when
/// the raw value strays from the slow one.
#[derive(Debug, Clone, PartialEq)]
pub struct DualEma {
    tau_fast: f64,
    tau_slow: f64,
    averages: Option<(f64, f64)>,
}

impl DualEma {
    /// Time constants are in seconds.
    pub fn new(tau_fast: f64, tau_slow: f64) -> Self {
        DualEma {
            tau_fast,
            tau_slow,
            averages: None,
        }
    }

    /// Network throughput smoothing.
    pub fn network() -> Self {
        DualEma::new(0.8, 2.5)
    }

    pub fn cpu() -> Self {
        DualEma::new(0.6, 1.5)
    }

    pub fn memory() -> Self {
        DualEma::new(0.5, 2.0)
    }

    /// Feeds `raw` observed `dt` seconds after the previous update and returns
    /// the blended value. The first update seeds both averages with `raw`.
    pub fn update(&mut self, raw: f64, dt: f64) -> f64 {
        let Some((fast, slow)) = self.averages.as_mut() else {
            self.averages = Some((raw, raw));
            return raw;
        };
        let alpha_fast = 1.0 - (-dt / self.tau_fast).exp();
        let alpha_slow = 1.0 - (-dt / self.tau_slow).exp();
        *fast += alpha_fast * (raw - *fast);
        *slow += alpha_slow * (raw - *slow);

        let deviation = (raw - *slow).abs() / slow.max(1.0);
        let blend = (2.0 * deviation).min(1.0);
        *slow + blend * (*fast - *slow)
    }

    /// `(fast, slow)` once seeded.
    pub fn averages(&self) -> Option<(f64, f64)> {
        self.averages
    }
}
