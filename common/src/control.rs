use crate::config::DeviceConfig;
use crate::types::{SensorSample, Telemetry};

/// Full-scale value of the 12-bit soil ADC.
pub const ADC_RAW_MAX: u16 = 4095;

/// Climate reads are retried this many times, spaced
/// [`CLIMATE_RETRY_DELAY_MS`] apart, before the cycle degrades to a zero
/// reading.
pub const CLIMATE_READ_ATTEMPTS: u32 = 3;
pub const CLIMATE_RETRY_DELAY_MS: u64 = 100;

/// Override input poll cadence and debounce window.
pub const OVERRIDE_POLL_MS: u64 = 50;
pub const OVERRIDE_DEBOUNCE_MS: u64 = 200;

/// Converts a raw ADC reading into an inverted 0–100 moisture percentage.
/// Dry probes read high, so the scaled value is flipped before clamping.
pub fn soil_percent_from_raw(raw: u16) -> u8 {
    let scaled = u32::from(raw.min(ADC_RAW_MAX)) * 100 / u32::from(ADC_RAW_MAX);
    (100 - scaled) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    On,
    Off,
}

impl RelayAction {
    pub fn level(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Threshold controller plus the shared observable state it produces: the
/// latest sample and the relay position. Both the periodic loop and the
/// manual override mutate relay state exclusively through this object, so
/// wrapping it in one mutex serializes every writer.
#[derive(Debug, Clone)]
pub struct ControlEngine {
    soil_min: i32,
    soil_max: i32,
    auto_enabled: bool,
    relay_on: bool,
    sample: SensorSample,
}

impl ControlEngine {
    pub fn new(cfg: &DeviceConfig) -> Self {
        Self {
            soil_min: cfg.soil_min,
            soil_max: cfg.soil_max,
            auto_enabled: cfg.auto_enabled,
            relay_on: false,
            sample: SensorSample::default(),
        }
    }

    pub fn sample(&self) -> SensorSample {
        self.sample
    }

    pub fn relay_on(&self) -> bool {
        self.relay_on
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry::new(&self.sample, self.relay_on)
    }

    /// Applies a settings update without restarting the loop. Expects
    /// already-sanitized values.
    pub fn set_thresholds(&mut self, soil_min: i32, soil_max: i32) {
        self.soil_min = soil_min;
        self.soil_max = soil_max;
    }

    pub fn set_auto_enabled(&mut self, enabled: bool) {
        self.auto_enabled = enabled;
    }

    /// Records the cycle's sample and returns the automatic relay decision.
    ///
    /// Turn-on requires the reading strictly below `soil_min`; turn-off
    /// requires reaching `soil_max`. Readings between the two bounds leave
    /// the relay wherever the last crossing put it, so the actuator cannot
    /// chatter around a single boundary.
    pub fn observe(&mut self, sample: SensorSample) -> Option<RelayAction> {
        self.sample = sample;

        if !self.auto_enabled {
            return None;
        }

        let soil = i32::from(sample.soil_percent);
        if soil < self.soil_min && !self.relay_on {
            self.relay_on = true;
            Some(RelayAction::On)
        } else if soil >= self.soil_max && self.relay_on {
            self.relay_on = false;
            Some(RelayAction::Off)
        } else {
            None
        }
    }

    /// Manual override: flips the relay unconditionally. The automatic
    /// logic takes back over at the next threshold crossing.
    pub fn manual_toggle(&mut self) -> RelayAction {
        self.relay_on = !self.relay_on;
        if self.relay_on {
            RelayAction::On
        } else {
            RelayAction::Off
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(soil_min: i32, soil_max: i32, auto_enabled: bool) -> ControlEngine {
        let mut cfg = DeviceConfig::default();
        cfg.soil_min = soil_min;
        cfg.soil_max = soil_max;
        cfg.auto_enabled = auto_enabled;
        ControlEngine::new(&cfg)
    }

    fn soil(percent: u8) -> SensorSample {
        SensorSample {
            temperature: 22.0,
            humidity: 50.0,
            soil_percent: percent,
        }
    }

    #[test]
    fn raw_normalization_inverts_and_clamps() {
        assert_eq!(soil_percent_from_raw(0), 100);
        assert_eq!(soil_percent_from_raw(ADC_RAW_MAX), 0);
        assert_eq!(soil_percent_from_raw(u16::MAX), 0);
        // Roughly mid-scale lands near 50 either side of integer division.
        let mid = soil_percent_from_raw(2048);
        assert!((49..=51).contains(&mid), "mid-scale was {mid}");
    }

    #[test]
    fn hysteresis_drives_off_on_off() {
        let mut engine = engine(40, 60, true);

        // 45 sits in the dead zone with the relay off: nothing happens.
        assert_eq!(engine.observe(soil(45)), None);
        assert!(!engine.relay_on());

        // 35 crosses below min: turn on.
        assert_eq!(engine.observe(soil(35)), Some(RelayAction::On));
        assert!(engine.relay_on());

        // 65 reaches max: turn off.
        assert_eq!(engine.observe(soil(65)), Some(RelayAction::Off));
        assert!(!engine.relay_on());
    }

    #[test]
    fn dead_zone_holds_state_in_both_directions() {
        let mut engine = engine(40, 60, true);

        assert_eq!(engine.observe(soil(30)), Some(RelayAction::On));
        // Everything in [min, max) keeps the relay on once it is on.
        for percent in [40, 45, 55, 59] {
            assert_eq!(engine.observe(soil(percent)), None);
            assert!(engine.relay_on());
        }

        assert_eq!(engine.observe(soil(60)), Some(RelayAction::Off));
        // And the same band keeps it off on the way back down to min.
        for percent in [59, 45, 40] {
            assert_eq!(engine.observe(soil(percent)), None);
            assert!(!engine.relay_on());
        }
    }

    #[test]
    fn auto_disabled_never_acts() {
        let mut engine = engine(40, 60, false);
        assert_eq!(engine.observe(soil(5)), None);
        assert_eq!(engine.observe(soil(95)), None);
        assert!(!engine.relay_on());
    }

    #[test]
    fn manual_toggle_bypasses_thresholds() {
        let mut engine = engine(40, 60, true);
        assert_eq!(engine.observe(soil(50)), None);

        assert_eq!(engine.manual_toggle(), RelayAction::On);
        assert!(engine.relay_on());
        assert_eq!(engine.manual_toggle(), RelayAction::Off);
        assert!(!engine.relay_on());
    }

    #[test]
    fn automatic_transition_overrides_manual_state() {
        let mut engine = engine(40, 60, true);

        // Operator forces the relay on inside the dead zone.
        engine.manual_toggle();
        assert!(engine.relay_on());

        // The next crossing of max takes over and turns it off again.
        assert_eq!(engine.observe(soil(60)), Some(RelayAction::Off));
        assert!(!engine.relay_on());
    }

    #[test]
    fn telemetry_reflects_latest_cycle() {
        let mut engine = engine(40, 60, true);
        engine.observe(SensorSample {
            temperature: 19.5,
            humidity: 71.0,
            soil_percent: 33,
        });

        let t = engine.telemetry();
        assert_eq!(t.temp, 19.5);
        assert_eq!(t.hum, 71.0);
        assert_eq!(t.soil, 33);
        assert_eq!(t.relay, 1);
    }
}
