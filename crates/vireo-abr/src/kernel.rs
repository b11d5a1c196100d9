/// Trend classification thresholds for a [`RateWindow`].
///
/// Thresholds apply to the *relative* slope: smoothed per-sample change
/// divided by the kernel magnitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelOptions {
    /// Smoothing factor of the value EWMA (0 < alpha <= 1).
    pub alpha: f64,
    /// Smoothing factor of the slope EWMA.
    pub slope_alpha: f64,
    /// Relative slope below `-decreasing_threshold` reports decreasing.
    pub decreasing_threshold: f64,
    /// Relative slope within `±slow_change_threshold` reports slow-changing.
    pub slow_change_threshold: f64,
    /// Relative slope below `-fast_decreasing_threshold` reports fast-decreasing.
    pub fast_decreasing_threshold: f64,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            slope_alpha: 0.5,
            decreasing_threshold: 0.01,
            slow_change_threshold: 0.02,
            fast_decreasing_threshold: 0.1,
        }
    }
}

/// Exponentially weighted moving statistics of a noisy signal.
#[derive(Clone, Debug)]
pub struct RateWindow {
    options: KernelOptions,
    kernel: Option<f64>,
    slope: f64,
    last: Option<f64>,
    len: usize,
}

impl RateWindow {
    const EPSILON: f64 = 1e-9;

    pub fn new(options: KernelOptions) -> Self {
        Self {
            options,
            kernel: None,
            slope: 0.0,
            last: None,
            len: 0,
        }
    }

    pub fn add(&mut self, sample: f64) {
        self.last = Some(sample);
        self.len = self.len.saturating_add(1);
        let Some(previous) = self.kernel else {
            self.kernel = Some(sample);
            return;
        };
        let kernel = previous + self.options.alpha * (sample - previous);
        let delta = kernel - previous;
        self.slope = if self.len == 2 {
            delta
        } else {
            self.slope + self.options.slope_alpha * (delta - self.slope)
        };
        self.kernel = Some(kernel);
    }

    /// Smoothed value, `0.0` before the first sample.
    pub fn kernel(&self) -> f64 {
        self.kernel.unwrap_or(0.0)
    }

    /// Smoothed per-sample change of the kernel.
    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.options);
    }

    fn relative_slope(&self) -> Option<f64> {
        (self.len >= 2).then(|| self.slope / self.kernel().abs().max(Self::EPSILON))
    }

    pub fn is_decreasing(&self) -> bool {
        self.relative_slope()
            .is_some_and(|s| s < -self.options.decreasing_threshold)
    }

    pub fn is_slow_changing(&self) -> bool {
        self.relative_slope()
            .is_some_and(|s| s.abs() <= self.options.slow_change_threshold)
    }

    pub fn is_fast_decreasing(&self) -> bool {
        self.relative_slope()
            .is_some_and(|s| s < -self.options.fast_decreasing_threshold)
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(KernelOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn feed(samples: impl IntoIterator<Item = f64>) -> RateWindow {
        let mut window = RateWindow::default();
        for s in samples {
            window.add(s);
        }
        window
    }

    #[test]
    fn first_sample_seeds_kernel() {
        let window = feed([5.0]);
        assert!((window.kernel() - 5.0).abs() < f64::EPSILON);
        assert_eq!(window.len(), 1);
        assert!(!window.is_decreasing());
        assert!(!window.is_slow_changing());
    }

    #[test]
    fn constant_signal_is_slow_changing() {
        let window = feed(std::iter::repeat_n(12.0, 10));
        assert!(window.is_slow_changing());
        assert!(!window.is_decreasing());
        assert!(window.slope().abs() < 1e-12);
    }

    #[test]
    fn steady_fall_eventually_decreasing() {
        let window = feed((0..40).map(|i| 30.0 - 0.5 * f64::from(i)));
        assert!(window.is_decreasing());
    }

    #[test]
    fn sharp_fall_eventually_fast_decreasing() {
        let window = feed((0..10).map(|i| 30.0 * 0.6f64.powi(i)));
        assert!(window.is_fast_decreasing());
        assert!(window.is_decreasing());
    }

    #[test]
    fn rising_signal_is_neither() {
        let window = feed((0..10).map(|i| 2.0 + 2.0 * f64::from(i)));
        assert!(!window.is_decreasing());
        assert!(!window.is_slow_changing());
        assert!(window.slope() > 0.0);
    }

    #[rstest]
    #[case(0.3, 10.0, 20.0, 13.0)]
    #[case(1.0, 10.0, 20.0, 20.0)]
    fn ewma_step(#[case] alpha: f64, #[case] a: f64, #[case] b: f64, #[case] expected: f64) {
        let mut window = RateWindow::new(KernelOptions {
            alpha,
            ..KernelOptions::default()
        });
        window.add(a);
        window.add(b);
        assert!((window.kernel() - expected).abs() < 1e-9);
        assert_eq!(window.last(), Some(b));
    }

    #[test]
    fn reset_keeps_options() {
        let options = KernelOptions {
            alpha: 0.9,
            ..KernelOptions::default()
        };
        let mut window = RateWindow::new(options);
        window.add(1.0);
        window.reset();
        assert!(window.is_empty());
        window.add(0.0);
        window.add(10.0);
        assert!((window.kernel() - 9.0).abs() < 1e-9);
    }
}
