//! Timing behaviour of the simulated SDK.

/// How the simulated camera spends wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Frames are ready as soon as they are requested; timeouts return quickly.
    #[default]
    Instant,
    /// Frames take the programmed exposure time; timeouts wait the full period.
    Realistic,
}

/// Hardware-like delays applied in [`MockMode::Realistic`] and the floor
/// delays applied in [`MockMode::Instant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Readout time added after exposure (Realistic only)
    pub frame_readout_ms: u64,
    /// Minimum spacing between free-running frames in Instant mode
    pub instant_frame_interval_ms: u64,
    /// Upper bound on the sleep behind a timed-out `get_frame` in Instant mode
    pub instant_timeout_ms: u64,
}

impl TimingConfig {
    /// USB2 SV305-class camera.
    pub fn camera() -> Self {
        Self {
            frame_readout_ms: 33,
            instant_frame_interval_ms: 1,
            instant_timeout_ms: 5,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            frame_readout_ms: 0,
            instant_frame_interval_ms: 1,
            instant_timeout_ms: 5,
        }
    }
}

/// Sensor temperature with exponential approach to the active setpoint.
#[derive(Debug, Clone)]
pub struct TemperatureSimulation {
    current: f64,
    ambient: f64,
    /// 1/s
    drift_rate: f64,
}

impl TemperatureSimulation {
    pub fn new(ambient: f64, drift_rate: f64) -> Self {
        Self {
            current: ambient,
            ambient,
            drift_rate,
        }
    }

    /// Advance by `dt_seconds`, pulled towards `target` when cooling, else ambient.
    pub fn update(&mut self, dt_seconds: f64, cooling_target: Option<f64>) {
        let setpoint = cooling_target.unwrap_or(self.ambient);
        let diff = setpoint - self.current;
        self.current += diff * (1.0 - (-self.drift_rate * dt_seconds).exp());
    }

    pub fn set_current(&mut self, value: f64) {
        self.current = value;
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Power the thermoelectric cooler draws to hold `target`, in percent.
    pub fn cooler_power(&self, cooling_target: Option<f64>) -> f64 {
        match cooling_target {
            Some(target) => ((self.ambient - target).max(0.0) * 2.0).clamp(0.0, 100.0),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_instant() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn camera_timing() {
        let t = TimingConfig::camera();
        assert_eq!(t.frame_readout_ms, 33);
    }

    #[test]
    fn temperature_approaches_target() {
        let mut sim = TemperatureSimulation::new(25.0, 0.5);
        sim.update(1.0, Some(-10.0));
        assert!(sim.current() < 25.0 && sim.current() > -10.0);
        for _ in 0..100 {
            sim.update(1.0, Some(-10.0));
        }
        assert!((sim.current() + 10.0).abs() < 0.01);
    }

    #[test]
    fn temperature_returns_to_ambient_without_cooler() {
        let mut sim = TemperatureSimulation::new(20.0, 1.0);
        sim.set_current(0.0);
        for _ in 0..50 {
            sim.update(1.0, None);
        }
        assert!((sim.current() - 20.0).abs() < 0.01);
        assert_eq!(sim.cooler_power(None), 0.0);
        assert_eq!(sim.cooler_power(Some(0.0)), 40.0);
    }
}
