//! [`FlashPlatform`] over any `embedded-storage` NOR flash driver, for targets
//! where the chip HAL already provides one.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::{
    block_device::{BlockDevice, FlashLimits, FlashPlatform},
    error::DeviceError,
};

pub const ERR_OTHER: i32 = -1;
pub const ERR_NOT_ALIGNED: i32 = -2;
pub const ERR_OUT_OF_BOUNDS: i32 = -3;
pub const ERR_ALREADY_OPEN: i32 = -4;

fn device_error<E: NorFlashError>(err: E) -> DeviceError {
    match err.kind() {
        NorFlashErrorKind::NotAligned => DeviceError(ERR_NOT_ALIGNED),
        NorFlashErrorKind::OutOfBounds => DeviceError(ERR_OUT_OF_BOUNDS),
        _ => DeviceError(ERR_OTHER),
    }
}

/// `flash` offset 0 sits at `base_address`; `limits` describe the window
/// left free after the program image.
pub struct NorFlashPlatform<F> {
    flash: Option<F>,
    base_address: u32,
    limits: FlashLimits,
}

impl<F: NorFlash> NorFlashPlatform<F> {
    pub fn new(flash: F, base_address: u32, limits: FlashLimits) -> Self {
        Self {
            flash: Some(flash),
            base_address,
            limits,
        }
    }
}

impl<F: NorFlash> FlashPlatform for NorFlashPlatform<F> {
    type Device = NorFlashDevice<F>;

    fn limits(&mut self) -> FlashLimits {
        self.limits
    }

    fn sector_size(&mut self, _address: u32) -> Option<u32> {
        u32::try_from(F::ERASE_SIZE).ok()
    }

    fn open(&mut self, start_address: u32, size: u32) -> Result<Self::Device, DeviceError> {
        let offset = start_address
            .checked_sub(self.base_address)
            .ok_or(DeviceError(ERR_OUT_OF_BOUNDS))?;
        let flash = self.flash.take().ok_or(DeviceError(ERR_ALREADY_OPEN))?;
        if offset as usize + size as usize > flash.capacity() {
            self.flash = Some(flash);
            return Err(DeviceError(ERR_OUT_OF_BOUNDS));
        }

        Ok(NorFlashDevice {
            flash,
            offset,
        })
    }

    fn close(&mut self, device: Self::Device) {
        self.flash = Some(device.release());
    }
}

pub struct NorFlashDevice<F> {
    flash: F,
    offset: u32,
}

impl<F> NorFlashDevice<F> {
    /// Hands the driver back, e.g. to a platform reclaiming a rejected window.
    pub fn release(self) -> F {
        self.flash
    }
}

impl<F: NorFlash> BlockDevice for NorFlashDevice<F> {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        ReadNorFlash::read(&mut self.flash, self.offset + offset, buf).map_err(device_error)
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.flash
            .write(self.offset + offset, data)
            .map_err(device_error)
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), DeviceError> {
        let from = self.offset + offset;
        self.flash.erase(from, from + len).map_err(device_error)
    }

    fn program_size(&self) -> u32 {
        F::WRITE_SIZE as u32
    }

    fn erase_size(&self) -> u32 {
        F::ERASE_SIZE as u32
    }
}
