use serde::Serialize;

use crate::config::SSID_MAX_LEN;

pub const SCAN_MAX_RESULTS: usize = 5;

/// Most recent sensor observation. A single value overwritten each cycle;
/// no history is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSample {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_percent: u8,
}

/// `/data` payload.
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    pub temp: f32,
    pub hum: f32,
    pub soil: u8,
    pub relay: u8,
}

impl Telemetry {
    pub fn new(sample: &SensorSample, relay_on: bool) -> Self {
        Self {
            temp: sample.temperature,
            hum: sample.humidity,
            soil: sample.soil_percent,
            relay: u8::from(relay_on),
        }
    }
}

/// `/scan` payload. An empty list is a successful scan, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResults {
    pub wifi: Vec<String>,
}

impl ScanResults {
    /// Keeps at most [`SCAN_MAX_RESULTS`] candidates in scan-result order,
    /// each SSID clipped to [`SSID_MAX_LEN`] bytes.
    pub fn from_ssids<I>(ssids: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self {
            wifi: ssids
                .into_iter()
                .take(SCAN_MAX_RESULTS)
                .map(|ssid| clip_str(ssid.as_ref(), SSID_MAX_LEN))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// `{"status":"success"}` acknowledgment for `/save-settings`.
#[derive(Debug, Serialize)]
pub struct SaveAck {
    pub status: &'static str,
}

impl SaveAck {
    pub fn success() -> Self {
        Self { status: "success" }
    }
}

/// Truncates to at most `max` bytes without splitting a UTF-8 character.
pub fn clip_str(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }

    let mut end = max;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_results_cap_and_clip() {
        let long = "x".repeat(40);
        let ssids = vec![
            "home".to_string(),
            long.clone(),
            "a".into(),
            "b".into(),
            "c".into(),
            "dropped".into(),
        ];

        let results = ScanResults::from_ssids(ssids);

        assert_eq!(results.wifi.len(), SCAN_MAX_RESULTS);
        assert_eq!(results.wifi[0], "home");
        assert_eq!(results.wifi[1].len(), SSID_MAX_LEN);
        assert!(!results.wifi.contains(&"dropped".to_string()));
    }

    #[test]
    fn empty_scan_serializes_as_empty_list() {
        let results = ScanResults::from_ssids(Vec::<String>::new());
        let json = serde_json::to_string(&results).unwrap();
        assert_eq!(json, r#"{"wifi":[]}"#);
    }

    #[test]
    fn telemetry_wire_shape() {
        let sample = SensorSample {
            temperature: 24.5,
            humidity: 61.0,
            soil_percent: 37,
        };
        let json = serde_json::to_string(&Telemetry::new(&sample, true)).unwrap();
        assert_eq!(json, r#"{"temp":24.5,"hum":61.0,"soil":37,"relay":1}"#);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        // 'ä' is two bytes; clipping at 3 must not split it.
        assert_eq!(clip_str("aää", 3), "aä");
        assert_eq!(clip_str("short", 31), "short");
    }
}
