use log::{debug, error, info, warn};

use crate::{
    block_device::{BlockDevice, FlashGeometry, FlashPlatform, FlashRegion},
    error::{FieldError, StoreError},
    record::{FieldValue, SettingsField, SettingsRecord, RECORD_LEN},
};

pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// Value flash reads back as after an erase; used to pad write buffers.
pub const ERASED_FILL: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Loading,
    /// RAM copy matches a verified flash record.
    Valid,
    /// RAM copy holds in-code defaults; flash was absent, corrupt, or is
    /// unreachable this session.
    DefaultsLoaded,
    /// RAM copy has changes not yet written.
    Dirty,
    Persisting,
}

impl StoreState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Loading => "LOADING",
            Self::Valid => "VALID",
            Self::DefaultsLoaded => "DEFAULTS_LOADED",
            Self::Dirty => "DIRTY",
            Self::Persisting => "PERSISTING",
        }
    }
}

/// Owns the authoritative settings record and its flash copy.
///
/// Every call is made from the one control loop that owns the store, so no
/// locking happens here. Mutations only touch RAM; [`SettingsStore::tick`]
/// writes the whole record once no change has arrived for the debounce
/// interval.
pub struct SettingsStore<D> {
    record: SettingsRecord,
    state: StoreState,
    dirty: bool,
    last_change_ms: u64,
    debounce_ms: u64,
    region: Option<FlashRegion<D>>,
}

impl<D: BlockDevice> SettingsStore<D> {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            record: SettingsRecord::default(),
            state: StoreState::Uninitialized,
            dirty: false,
            last_change_ms: 0,
            debounce_ms,
            region: None,
        }
    }

    /// Boot sequence: discover the flash window, load and verify the stored
    /// record, and fall back to defaults (with one repair write) when it is
    /// missing or corrupt. Never fails; the returned state says which copy
    /// the RAM record came from.
    pub fn initialize<P>(&mut self, platform: &mut P, now_ms: u64) -> StoreState
    where
        P: FlashPlatform<Device = D>,
    {
        info!("settings: initializing storage");
        self.state = StoreState::Loading;
        self.region = None;

        match FlashRegion::initialize(platform, RECORD_LEN) {
            Ok(region) => {
                self.region = Some(region);
                match self.load() {
                    Ok(record) => {
                        info!("settings: valid settings loaded from flash");
                        self.record = record;
                        self.state = StoreState::Valid;
                    }
                    Err(err) => {
                        warn!("settings: {err}; loading defaults and repairing flash");
                        self.load_default_settings();
                        self.state = StoreState::DefaultsLoaded;
                        if let Err(err) = self.write_record() {
                            error!("settings: failed to save defaults after load failure: {err}");
                        }
                    }
                }
            }
            Err(err) => {
                error!("settings: {err}; running from RAM defaults");
                self.load_default_settings();
                self.state = StoreState::DefaultsLoaded;
            }
        }

        self.dirty = false;
        self.last_change_ms = now_ms;
        self.state
    }

    /// Snapshot of the RAM record, including changes not yet persisted.
    pub fn get(&self) -> SettingsRecord {
        self.record
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn persistence_enabled(&self) -> bool {
        self.region.is_some()
    }

    pub fn geometry(&self) -> Option<FlashGeometry> {
        self.region.as_ref().map(FlashRegion::geometry)
    }

    pub fn load_default_settings(&mut self) {
        info!("settings: loading default settings into RAM");
        self.record = SettingsRecord::default();
    }

    pub fn set_field(
        &mut self,
        field: SettingsField,
        value: impl Into<FieldValue>,
        now_ms: u64,
    ) -> Result<(), FieldError> {
        let value = value.into();
        self.record.set(field, value)?;
        debug!("settings: {field} = {value:?}");
        self.mark_dirty(now_ms);
        Ok(())
    }

    pub fn set_field_by_name(
        &mut self,
        name: &str,
        value: impl Into<FieldValue>,
        now_ms: u64,
    ) -> Result<(), FieldError> {
        let field = name.parse::<SettingsField>()?;
        self.set_field(field, value, now_ms)
    }

    /// Restores the in-code defaults; they reach flash through the normal
    /// debounce.
    pub fn reset_to_defaults(&mut self, now_ms: u64) {
        self.load_default_settings();
        self.mark_dirty(now_ms);
    }

    /// Periodic driver hook. Returns `Ok(true)` when a write happened.
    pub fn tick(&mut self, now_ms: u64) -> Result<bool, StoreError> {
        if !self.dirty || self.region.is_none() {
            return Ok(false);
        }
        if now_ms.saturating_sub(self.last_change_ms) < self.debounce_ms {
            return Ok(false);
        }

        self.persist(now_ms).map(|()| true)
    }

    /// Writes the whole RAM record. On failure the record stays dirty and the
    /// change timestamp moves to `now_ms`, so the next attempt waits a full
    /// debounce interval.
    pub fn persist(&mut self, now_ms: u64) -> Result<(), StoreError> {
        if self.region.is_none() {
            return Err(StoreError::PersistenceUnavailable);
        }
        self.state = StoreState::Persisting;

        match self.write_record() {
            Ok(()) => {
                self.dirty = false;
                self.state = StoreState::Valid;
                Ok(())
            }
            Err(err) => {
                warn!("settings: save attempt failed, settings remain dirty: {err}");
                self.dirty = true;
                self.last_change_ms = now_ms;
                self.state = StoreState::Dirty;
                Err(err)
            }
        }
    }

    fn mark_dirty(&mut self, now_ms: u64) {
        if self.region.is_none() {
            debug!("settings: marked dirty but persistence is unavailable");
        }
        if !self.dirty {
            info!("settings: marked dirty, will save after debounce");
        }
        self.dirty = true;
        self.last_change_ms = now_ms;
        self.state = StoreState::Dirty;
    }

    fn load(&mut self) -> Result<SettingsRecord, StoreError> {
        let region = self
            .region
            .as_mut()
            .ok_or(StoreError::PersistenceUnavailable)?;

        let len = region.geometry().program_len(RECORD_LEN);
        let mut buf = vec![0_u8; len as usize];
        region.read(0, &mut buf).map_err(StoreError::ReadFailed)?;

        Ok(SettingsRecord::decode(&buf)?)
    }

    fn write_record(&mut self) -> Result<(), StoreError> {
        let region = self
            .region
            .as_mut()
            .ok_or(StoreError::PersistenceUnavailable)?;
        let geometry = region.geometry();

        let mut buf = vec![ERASED_FILL; geometry.program_len(RECORD_LEN) as usize];
        buf[..RECORD_LEN].copy_from_slice(&self.record.encode());

        debug!("settings: erasing {} bytes", geometry.storage_size);
        region
            .erase(0, geometry.storage_size)
            .map_err(StoreError::EraseFailed)?;

        debug!("settings: programming {} bytes", buf.len());
        region.program(0, &buf).map_err(StoreError::ProgramFailed)?;

        info!("settings: written to flash");
        Ok(())
    }
}
