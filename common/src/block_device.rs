use log::{debug, info};

use crate::error::{DeviceError, GeometryError, RegionError};

/// Raw erase/program/read primitives over an opened flash window. Offsets
/// are relative to the start of the window.
pub trait BlockDevice {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Programs `data` at `offset`. Like NOR flash, programming can only move
    /// bits from the erased state, so the range must be erased first.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError>;

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), DeviceError>;

    /// Smallest writable unit in bytes.
    fn program_size(&self) -> u32;

    /// Smallest erasable unit in bytes.
    fn erase_size(&self) -> u32;
}

/// Usable flash past the running program image, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashLimits {
    pub flash_size: u32,
    pub start_address: u32,
    pub available_size: u32,
}

/// Discovers the settings flash window and opens a device over it.
pub trait FlashPlatform {
    type Device: BlockDevice;

    fn limits(&mut self) -> FlashLimits;

    /// Sector size at `address`, `None` when the platform cannot tell.
    fn sector_size(&mut self, address: u32) -> Option<u32>;

    fn open(&mut self, start_address: u32, size: u32) -> Result<Self::Device, DeviceError>;

    /// Takes back a device that failed validation after `open`.
    fn close(&mut self, device: Self::Device) {
        drop(device);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    pub start_address: u32,
    pub available_size: u32,
    /// Whole sectors reserved for the record.
    pub storage_size: u32,
    pub program_size: u32,
    pub erase_size: u32,
}

impl FlashGeometry {
    /// Length of a record image padded to whole program units.
    pub fn program_len(&self, record_len: usize) -> u32 {
        round_up(record_len as u32, self.program_size)
    }
}

pub fn round_up(len: u32, unit: u32) -> u32 {
    len.div_ceil(unit).saturating_mul(unit)
}

/// An opened block device plus the geometry it was validated against. All
/// calls are bounds checked and writes must respect unit alignment.
pub struct FlashRegion<D> {
    device: D,
    geometry: FlashGeometry,
}

impl<D: BlockDevice> FlashRegion<D> {
    pub fn initialize<P>(platform: &mut P, record_len: usize) -> Result<Self, GeometryError>
    where
        P: FlashPlatform<Device = D>,
    {
        let limits = platform.limits();
        if limits.start_address == 0 || limits.available_size == 0 {
            return Err(GeometryError::GeometryUnavailable {
                start_address: limits.start_address,
                available_size: limits.available_size,
            });
        }

        info!(
            "flash: total {} KB, storage start 0x{:08X}, available {} KB",
            limits.flash_size / 1024,
            limits.start_address,
            limits.available_size / 1024
        );

        let sector_size = platform
            .sector_size(limits.start_address)
            .filter(|size| *size > 0)
            .ok_or(GeometryError::InvalidSectorSize)?;

        let storage_size = round_up(record_len as u32, sector_size);
        if storage_size > limits.available_size {
            return Err(GeometryError::InsufficientSpace {
                needed: storage_size,
                available: limits.available_size,
            });
        }
        debug!("flash: sector {sector_size} bytes, reserving {storage_size} bytes");

        let device = platform
            .open(limits.start_address, storage_size)
            .map_err(GeometryError::OpenFailed)?;

        match Self::check_units(&device, limits, storage_size, record_len) {
            Ok(geometry) => Ok(Self { device, geometry }),
            Err(err) => {
                platform.close(device);
                Err(err)
            }
        }
    }

    fn check_units(
        device: &D,
        limits: FlashLimits,
        storage_size: u32,
        record_len: usize,
    ) -> Result<FlashGeometry, GeometryError> {
        let program_size = device.program_size();
        let erase_size = device.erase_size();
        if program_size == 0 || erase_size == 0 || storage_size % erase_size != 0 {
            return Err(GeometryError::InvalidBlockSizes {
                program_size,
                erase_size,
            });
        }

        let erase_needed = round_up(record_len as u32, erase_size);
        if erase_needed > limits.available_size {
            return Err(GeometryError::InsufficientSpace {
                needed: erase_needed,
                available: limits.available_size,
            });
        }

        let program_needed = round_up(record_len as u32, program_size);
        if program_needed > storage_size {
            return Err(GeometryError::InsufficientSpace {
                needed: program_needed,
                available: storage_size,
            });
        }

        info!("flash: program unit {program_size} bytes, erase unit {erase_size} bytes");

        Ok(FlashGeometry {
            start_address: limits.start_address,
            available_size: limits.available_size,
            storage_size,
            program_size,
            erase_size,
        })
    }

    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), RegionError> {
        self.check_bounds("read", offset, buf.len() as u32)?;
        self.device.read(offset, buf)?;
        Ok(())
    }

    pub fn erase(&mut self, offset: u32, len: u32) -> Result<(), RegionError> {
        self.check_bounds("erase", offset, len)?;
        let unit = self.geometry.erase_size;
        if offset % unit != 0 || len % unit != 0 {
            return Err(RegionError::Misaligned {
                op: "erase",
                offset,
                len,
                unit,
            });
        }
        self.device.erase(offset, len)?;
        Ok(())
    }

    /// `data` must start on an erase unit and span whole program units; the
    /// caller pads it with the erased fill value.
    pub fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), RegionError> {
        let len = data.len() as u32;
        self.check_bounds("program", offset, len)?;
        if offset % self.geometry.erase_size != 0 {
            return Err(RegionError::Misaligned {
                op: "program",
                offset,
                len,
                unit: self.geometry.erase_size,
            });
        }
        if len % self.geometry.program_size != 0 {
            return Err(RegionError::Misaligned {
                op: "program",
                offset,
                len,
                unit: self.geometry.program_size,
            });
        }
        self.device.program(offset, data)?;
        Ok(())
    }

    fn check_bounds(&self, op: &'static str, offset: u32, len: u32) -> Result<(), RegionError> {
        let size = self.geometry.storage_size;
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(RegionError::OutOfBounds {
                op,
                offset,
                len,
                size,
            }),
        }
    }
}
