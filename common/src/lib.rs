pub mod block_device;
pub mod climate;
pub mod config;
pub mod error;
pub mod history;
pub mod nor_flash;
pub mod record;
pub mod rpc;
pub mod store;
pub mod web_form;

pub use block_device::{BlockDevice, FlashGeometry, FlashLimits, FlashPlatform, FlashRegion};
pub use climate::{ClimateEngine, ClimateOutputs};
pub use config::{ControllerConfig, SimulatedFlashConfig};
pub use error::{DeviceError, FieldError, GeometryError, RecordError, RegionError, StoreError};
pub use history::{TempSample, TemperatureHistory};
pub use nor_flash::{NorFlashDevice, NorFlashPlatform};
pub use record::{FieldKind, FieldValue, SettingsField, SettingsRecord, RECORD_LEN};
pub use rpc::{SettingsCommand, SettingsMirror};
pub use store::{SettingsStore, StoreState};
pub use web_form::parse_settings_form;
