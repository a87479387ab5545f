pub mod config;
pub mod control;
pub mod error;
pub mod form;
pub mod netmode;
pub mod types;

pub use config::{load_config, save_config, DeviceConfig, KvStore};
pub use control::{soil_percent_from_raw, ControlEngine, RelayAction};
pub use error::{NetworkJoinError, PersistError, RequestError, SensorError};
pub use netmode::{ModeEffect, ModeMachine, NetworkEvent, NetworkState};
pub use types::{ErrorBody, SaveAck, ScanResults, SensorSample, Telemetry};
