use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_DEBOUNCE_MS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub settings_save_debounce_ms: u64,
    pub control_interval_ms: u64,
    pub sensor_read_interval_ms: u64,
    pub history_sample_interval_ms: u64,
    pub history_capacity: usize,
    pub mirror_refresh_interval_ms: u64,
    pub timezone: String,
    pub http_port: u16,
    pub flash: SimulatedFlashConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            settings_save_debounce_ms: DEFAULT_DEBOUNCE_MS,
            control_interval_ms: 200,
            sensor_read_interval_ms: 2_000,
            history_sample_interval_ms: 300_000,
            history_capacity: 100,
            mirror_refresh_interval_ms: 2_000,
            timezone: "America/New_York".to_string(),
            http_port: 8080,
            flash: SimulatedFlashConfig::default(),
        }
    }
}

/// Internal flash as seen by the host build: a dual-bank 2 MB part with the
/// program image ending at `app_end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatedFlashConfig {
    pub base_address: u32,
    pub flash_size: u32,
    pub app_end: u32,
    pub sector_size: u32,
    pub program_size: u32,
    pub erase_size: u32,
    pub file_name: String,
}

impl Default for SimulatedFlashConfig {
    fn default() -> Self {
        Self {
            base_address: 0x0800_0000,
            flash_size: 2 * 1024 * 1024,
            app_end: 0x081C_0000,
            sector_size: 128 * 1024,
            program_size: 32,
            erase_size: 128 * 1024,
            file_name: "flash.bin".to_string(),
        }
    }
}

impl SimulatedFlashConfig {
    /// First sector boundary at or after the program image.
    pub fn storage_start(&self) -> u32 {
        if self.sector_size == 0 {
            return self.app_end;
        }
        let offset = self.app_end.saturating_sub(self.base_address);
        self.base_address + offset.div_ceil(self.sector_size) * self.sector_size
    }

    pub fn available_size(&self) -> u32 {
        let end = self.base_address.saturating_add(self.flash_size);
        end.saturating_sub(self.storage_start())
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.settings_save_debounce_ms = self.settings_save_debounce_ms.max(250);
        self.control_interval_ms = self.control_interval_ms.clamp(10, 5_000);
        self.sensor_read_interval_ms = self.sensor_read_interval_ms.max(self.control_interval_ms);
        self.history_sample_interval_ms = self.history_sample_interval_ms.max(1_000);
        self.mirror_refresh_interval_ms = self.mirror_refresh_interval_ms.max(100);
        self.history_capacity = self.history_capacity.clamp(1, 10_000);

        if self.timezone.trim().is_empty() {
            self.timezone = Self::default().timezone;
        }
    }
}
