use crate::error::{PersistError, RequestError};
use crate::form::{form_flag, form_value};
use crate::types::clip_str;

pub const DEFAULT_DEVICE_ID: &str = "esp32-01";
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 300_000;
pub const MIN_SAMPLE_PERIOD_MS: u32 = 1_000;
pub const DEFAULT_SOIL_MIN: i32 = 40;
pub const DEFAULT_SOIL_MAX: i32 = 60;

pub const SSID_MAX_LEN: usize = 31;
pub const PASSWORD_MAX_LEN: usize = 63;
pub const DEVICE_ID_MAX_LEN: usize = 31;

/// Namespace and keys in the persisted key-value store.
pub const KV_NAMESPACE: &str = "storage";
pub const KEY_SSID: &str = "ssid";
pub const KEY_PASSWORD: &str = "pass";
pub const KEY_DEVICE_ID: &str = "dev_id";
pub const KEY_SAMPLE_PERIOD: &str = "data_cycle";
pub const KEY_SOIL_MIN: &str = "soil_min";
pub const KEY_SOIL_MAX: &str = "soil_max";
pub const KEY_AUTO_ENABLED: &str = "auto_en";

/// Identity and control parameters. Written only through the validated
/// update path: every mutation goes through [`DeviceConfig::sanitize`]
/// before it is stored or acted on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub network_ssid: String,
    pub network_password: String,
    pub device_id: String,
    pub sample_period_ms: u32,
    pub soil_min: i32,
    pub soil_max: i32,
    pub auto_enabled: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            network_ssid: String::new(),
            network_password: String::new(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            soil_min: DEFAULT_SOIL_MIN,
            soil_max: DEFAULT_SOIL_MAX,
            auto_enabled: false,
        }
    }
}

impl DeviceConfig {
    /// Clamps every field into its valid domain. Invariant on exit:
    /// `soil_min < soil_max`; a violating pair resets to the defaults
    /// rather than being partially repaired.
    pub fn sanitize(&mut self) {
        self.network_ssid = clip_str(&self.network_ssid, SSID_MAX_LEN);
        self.network_password = clip_str(&self.network_password, PASSWORD_MAX_LEN);

        self.device_id = clip_str(self.device_id.trim(), DEVICE_ID_MAX_LEN);
        if self.device_id.is_empty() {
            self.device_id = DEFAULT_DEVICE_ID.to_string();
        }

        self.sample_period_ms = self.sample_period_ms.max(MIN_SAMPLE_PERIOD_MS);

        if self.soil_min >= self.soil_max {
            self.soil_min = DEFAULT_SOIL_MIN;
            self.soil_max = DEFAULT_SOIL_MAX;
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.network_ssid.trim().is_empty()
    }

    /// Applies a full `/config` submission. Fields absent from the form
    /// keep their current values; numeric fields that fail to parse are
    /// ignored rather than zeroed. The result is sanitized before use.
    pub fn apply_submission(&mut self, body: &str) {
        if let Some(device_id) = form_value(body, "dev_id") {
            self.device_id = device_id;
        }
        if let Some(period) = parse_field::<u32>(body, "cycle") {
            self.sample_period_ms = period;
        }
        if let Some(soil_min) = parse_field::<i32>(body, "min") {
            self.soil_min = soil_min;
        }
        if let Some(soil_max) = parse_field::<i32>(body, "max") {
            self.soil_max = soil_max;
        }
        if let Some(ssid) = form_value(body, "ssid") {
            self.network_ssid = ssid;
        }
        if let Some(password) = form_value(body, "pass") {
            self.network_password = password;
        }
        // Checkbox: unchecked boxes are simply absent from the form.
        self.auto_enabled = form_flag(body, "auto");

        self.sanitize();
    }

    /// Applies a sectioned `/save-settings` update. Network credentials are
    /// never touched by this path.
    pub fn apply_partial_update(&mut self, body: &str) -> Result<(), RequestError> {
        match form_value(body, "section").as_deref() {
            Some("device") => {
                if let Some(device_id) = form_value(body, "dev_id") {
                    self.device_id = device_id;
                }
                if let Some(period) = parse_field::<u32>(body, "cycle") {
                    self.sample_period_ms = period;
                }
            }
            Some("auto") => {
                if let Some(soil_min) = parse_field::<i32>(body, "min") {
                    self.soil_min = soil_min;
                }
                if let Some(soil_max) = parse_field::<i32>(body, "max") {
                    self.soil_max = soil_max;
                }
                self.auto_enabled = form_flag(body, "auto");
            }
            _ => return Err(RequestError::BadField("section")),
        }

        self.sanitize();
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(body: &str, key: &str) -> Option<T> {
    form_value(body, key)?.trim().parse().ok()
}

/// Persistence collaborator boundary: NVS on the device, a JSON file in the
/// host simulator. Writes become visible to readers only after `commit`
/// succeeds; a failed commit leaves previously committed values intact.
pub trait KvStore {
    fn get_str(&mut self, key: &str) -> Option<String>;
    fn get_u32(&mut self, key: &str) -> Option<u32>;
    fn get_i32(&mut self, key: &str) -> Option<i32>;
    fn get_bool(&mut self, key: &str) -> Option<bool>;

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), PersistError>;
    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError>;
    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), PersistError>;
    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), PersistError>;

    fn commit(&mut self) -> Result<(), PersistError>;
}

/// Reads the persisted configuration, substituting the default for every
/// missing key, then re-validates the whole struct.
pub fn load_config(store: &mut dyn KvStore) -> DeviceConfig {
    let defaults = DeviceConfig::default();

    let mut cfg = DeviceConfig {
        network_ssid: store.get_str(KEY_SSID).unwrap_or(defaults.network_ssid),
        network_password: store
            .get_str(KEY_PASSWORD)
            .unwrap_or(defaults.network_password),
        device_id: store.get_str(KEY_DEVICE_ID).unwrap_or(defaults.device_id),
        sample_period_ms: store
            .get_u32(KEY_SAMPLE_PERIOD)
            .unwrap_or(defaults.sample_period_ms),
        soil_min: store.get_i32(KEY_SOIL_MIN).unwrap_or(defaults.soil_min),
        soil_max: store.get_i32(KEY_SOIL_MAX).unwrap_or(defaults.soil_max),
        auto_enabled: store
            .get_bool(KEY_AUTO_ENABLED)
            .unwrap_or(defaults.auto_enabled),
    };

    cfg.sanitize();
    cfg
}

/// Writes all fields, then commits. Individual field-write failures are
/// swallowed; only the commit outcome is reported, and the caller treats it
/// as non-fatal (in-memory values stay authoritative, retried on next save).
pub fn save_config(store: &mut dyn KvStore, cfg: &DeviceConfig) -> Result<(), PersistError> {
    let _ = store.set_str(KEY_SSID, &cfg.network_ssid);
    let _ = store.set_str(KEY_PASSWORD, &cfg.network_password);
    let _ = store.set_str(KEY_DEVICE_ID, &cfg.device_id);
    let _ = store.set_u32(KEY_SAMPLE_PERIOD, cfg.sample_period_ms);
    let _ = store.set_i32(KEY_SOIL_MIN, cfg.soil_min);
    let _ = store.set_i32(KEY_SOIL_MAX, cfg.soil_max);
    let _ = store.set_bool(KEY_AUTO_ENABLED, cfg.auto_enabled);

    store.commit()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    /// In-memory store with NVS-like commit semantics: sets land in a
    /// staging area and only become readable after a successful commit.
    #[derive(Default)]
    struct MemKv {
        committed: HashMap<String, String>,
        staged: HashMap<String, String>,
        fail_commit: bool,
    }

    impl MemKv {
        fn read(&self, key: &str) -> Option<&String> {
            self.committed.get(key)
        }

        fn stage(&mut self, key: &str, value: String) -> Result<(), PersistError> {
            self.staged.insert(key.to_string(), value);
            Ok(())
        }
    }

    impl KvStore for MemKv {
        fn get_str(&mut self, key: &str) -> Option<String> {
            self.read(key).cloned()
        }

        fn get_u32(&mut self, key: &str) -> Option<u32> {
            self.read(key)?.parse().ok()
        }

        fn get_i32(&mut self, key: &str) -> Option<i32> {
            self.read(key)?.parse().ok()
        }

        fn get_bool(&mut self, key: &str) -> Option<bool> {
            self.read(key)?.parse().ok()
        }

        fn set_str(&mut self, key: &str, value: &str) -> Result<(), PersistError> {
            self.stage(key, value.to_string())
        }

        fn set_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError> {
            self.stage(key, value.to_string())
        }

        fn set_i32(&mut self, key: &str, value: i32) -> Result<(), PersistError> {
            self.stage(key, value.to_string())
        }

        fn set_bool(&mut self, key: &str, value: bool) -> Result<(), PersistError> {
            self.stage(key, value.to_string())
        }

        fn commit(&mut self) -> Result<(), PersistError> {
            if self.fail_commit {
                self.staged.clear();
                return Err(PersistError("simulated commit failure".into()));
            }
            self.committed.extend(self.staged.drain());
            Ok(())
        }
    }

    #[test]
    fn empty_store_loads_defaults() {
        let mut store = MemKv::default();
        let cfg = load_config(&mut store);

        assert_eq!(cfg.device_id, "esp32-01");
        assert_eq!(cfg.sample_period_ms, 300_000);
        assert_eq!(cfg.soil_min, 40);
        assert_eq!(cfg.soil_max, 60);
        assert!(!cfg.auto_enabled);
        assert!(cfg.network_ssid.is_empty());
    }

    #[test]
    fn save_then_load_round_trips_all_fields() {
        let mut store = MemKv::default();
        let mut cfg = DeviceConfig {
            network_ssid: "greenhouse".into(),
            network_password: "hunter22".into(),
            device_id: "bed-3".into(),
            sample_period_ms: 60_000,
            soil_min: 25,
            soil_max: 70,
            auto_enabled: true,
        };
        cfg.sanitize();

        save_config(&mut store, &cfg).unwrap();
        let loaded = load_config(&mut store);

        assert_eq!(loaded, cfg);
    }

    #[test]
    fn inverted_thresholds_reset_to_defaults() {
        let mut cfg = DeviceConfig {
            soil_min: 80,
            soil_max: 30,
            ..DeviceConfig::default()
        };
        cfg.sanitize();
        assert_eq!((cfg.soil_min, cfg.soil_max), (40, 60));

        // Equal bounds count as inverted too.
        let mut cfg = DeviceConfig {
            soil_min: 50,
            soil_max: 50,
            ..DeviceConfig::default()
        };
        cfg.sanitize();
        assert_eq!((cfg.soil_min, cfg.soil_max), (40, 60));
    }

    #[test]
    fn short_period_clamps_to_floor() {
        let mut cfg = DeviceConfig {
            sample_period_ms: 250,
            ..DeviceConfig::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.sample_period_ms, 1_000);
    }

    #[test]
    fn corrupt_numeric_key_falls_back_to_default() {
        let mut store = MemKv::default();
        store.set_str(KEY_SAMPLE_PERIOD, "not-a-number").unwrap();
        store.commit().unwrap();

        let cfg = load_config(&mut store);
        assert_eq!(cfg.sample_period_ms, DEFAULT_SAMPLE_PERIOD_MS);
    }

    #[test]
    fn failed_commit_keeps_previous_values_visible() {
        let mut store = MemKv::default();
        let mut first = DeviceConfig::default();
        first.device_id = "original".into();
        save_config(&mut store, &first).unwrap();

        store.fail_commit = true;
        let mut second = DeviceConfig::default();
        second.device_id = "replacement".into();
        let err = save_config(&mut store, &second);

        assert!(err.is_err());
        store.fail_commit = false;
        assert_eq!(load_config(&mut store).device_id, "original");
    }

    #[test]
    fn full_submission_updates_and_validates() {
        let mut cfg = DeviceConfig::default();
        cfg.apply_submission(
            "dev_id=patch-9&cycle=500&min=70&max=20&ssid=My+Home%2FNet&pass=p%40ss&auto=on",
        );

        assert_eq!(cfg.device_id, "patch-9");
        // Below-floor period clamps, inverted thresholds reset.
        assert_eq!(cfg.sample_period_ms, 1_000);
        assert_eq!((cfg.soil_min, cfg.soil_max), (40, 60));
        assert_eq!(cfg.network_ssid, "My Home/Net");
        assert_eq!(cfg.network_password, "p@ss");
        assert!(cfg.auto_enabled);
    }

    #[test]
    fn submission_without_checkbox_disables_auto() {
        let mut cfg = DeviceConfig {
            auto_enabled: true,
            ..DeviceConfig::default()
        };
        cfg.apply_submission("ssid=net&pass=x&min=40&max=60");
        assert!(!cfg.auto_enabled);
    }

    #[test]
    fn unparsable_numeric_field_keeps_current_value() {
        let mut cfg = DeviceConfig {
            sample_period_ms: 5_000,
            ..DeviceConfig::default()
        };
        cfg.apply_submission("ssid=net&cycle=soon");
        assert_eq!(cfg.sample_period_ms, 5_000);
    }

    #[test]
    fn partial_update_is_sectioned_and_leaves_credentials_alone() {
        let mut cfg = DeviceConfig {
            network_ssid: "keep-me".into(),
            network_password: "secret".into(),
            ..DeviceConfig::default()
        };

        cfg.apply_partial_update("section=device&dev_id=renamed&cycle=2000")
            .unwrap();
        assert_eq!(cfg.device_id, "renamed");
        assert_eq!(cfg.sample_period_ms, 2_000);

        cfg.apply_partial_update("section=auto&min=10&max=90&auto=on")
            .unwrap();
        assert_eq!((cfg.soil_min, cfg.soil_max), (10, 90));
        assert!(cfg.auto_enabled);

        // The device section must not apply threshold fields and vice versa.
        cfg.apply_partial_update("section=device&min=1&max=2").unwrap();
        assert_eq!((cfg.soil_min, cfg.soil_max), (10, 90));

        assert_eq!(cfg.network_ssid, "keep-me");
        assert_eq!(cfg.network_password, "secret");
    }

    #[test]
    fn partial_update_rejects_unknown_section() {
        let mut cfg = DeviceConfig::default();
        let before = cfg.clone();

        assert!(cfg.apply_partial_update("section=network&ssid=evil").is_err());
        assert!(cfg.apply_partial_update("dev_id=orphan").is_err());
        assert_eq!(cfg, before);
    }

    #[test]
    fn overlong_identity_fields_are_clipped() {
        let mut cfg = DeviceConfig {
            network_ssid: "s".repeat(50),
            network_password: "p".repeat(90),
            device_id: "d".repeat(50),
            ..DeviceConfig::default()
        };
        cfg.sanitize();

        assert_eq!(cfg.network_ssid.len(), SSID_MAX_LEN);
        assert_eq!(cfg.network_password.len(), PASSWORD_MAX_LEN);
        assert_eq!(cfg.device_id.len(), DEVICE_ID_MAX_LEN);
    }
}
