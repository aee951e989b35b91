use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use greenhouse_common::{
    block_device::{BlockDevice, FlashLimits, FlashPlatform},
    config::SimulatedFlashConfig,
    error::DeviceError,
    nor_flash::{ERR_NOT_ALIGNED, ERR_OUT_OF_BOUNDS},
    store::ERASED_FILL,
};
use tracing::{debug, warn};

pub const ERR_IO: i32 = -5;

fn io_error(op: &str, err: std::io::Error) -> DeviceError {
    warn!("flash file {op} failed: {err}");
    DeviceError(ERR_IO)
}

/// Internal flash simulated by a file holding only the storage window, so
/// file offset 0 is the first byte past the program image.
pub struct FileFlash {
    path: PathBuf,
    config: SimulatedFlashConfig,
}

impl FileFlash {
    pub fn new(data_dir: &Path, config: SimulatedFlashConfig) -> Self {
        Self {
            path: data_dir.join(&config.file_name),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let wanted = u64::from(self.config.available_size());
        let current = file.metadata()?.len();
        if current < wanted {
            // Fresh or short image: the missing tail reads back as erased.
            file.seek(SeekFrom::Start(current))?;
            file.write_all(&vec![ERASED_FILL; (wanted - current) as usize])?;
            file.sync_data()?;
        }
        Ok(file)
    }
}

impl FlashPlatform for FileFlash {
    type Device = FileBlockDevice;

    fn limits(&mut self) -> FlashLimits {
        let available_size = self.config.available_size();
        FlashLimits {
            flash_size: self.config.flash_size,
            start_address: if available_size == 0 {
                0
            } else {
                self.config.storage_start()
            },
            available_size,
        }
    }

    fn sector_size(&mut self, _address: u32) -> Option<u32> {
        (self.config.sector_size > 0).then_some(self.config.sector_size)
    }

    fn open(&mut self, start_address: u32, size: u32) -> Result<FileBlockDevice, DeviceError> {
        let window_start = self.config.storage_start();
        if start_address != window_start || size > self.config.available_size() {
            return Err(DeviceError(ERR_OUT_OF_BOUNDS));
        }

        let file = self.open_file().map_err(|err| io_error("open", err))?;
        debug!(
            "flash file {} opened, {} bytes at 0x{start_address:08X}",
            self.path.display(),
            size
        );

        Ok(FileBlockDevice {
            file,
            size,
            program_size: self.config.program_size,
            erase_size: self.config.erase_size,
        })
    }
}

pub struct FileBlockDevice {
    file: File,
    size: u32,
    program_size: u32,
    erase_size: u32,
}

impl FileBlockDevice {
    fn check(&self, offset: u32, len: usize) -> Result<u64, DeviceError> {
        match u32::try_from(len).ok().and_then(|len| offset.checked_add(len)) {
            Some(end) if end <= self.size => Ok(u64::from(offset)),
            _ => Err(DeviceError(ERR_OUT_OF_BOUNDS)),
        }
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_data()
    }
}

impl BlockDevice for FileBlockDevice {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let at = self.check(offset, buf.len())?;
        self.read_at(at, buf).map_err(|err| io_error("read", err))
    }

    /// NOR program: each bit can only go from 1 to 0.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        let at = self.check(offset, data.len())?;
        if data.len() % self.program_size as usize != 0 {
            return Err(DeviceError(ERR_NOT_ALIGNED));
        }

        let mut cells = vec![0_u8; data.len()];
        self.read_at(at, &mut cells)
            .map_err(|err| io_error("program", err))?;
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.write_at(at, &cells)
            .map_err(|err| io_error("program", err))
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), DeviceError> {
        let at = self.check(offset, len as usize)?;
        if offset % self.erase_size != 0 || len % self.erase_size != 0 {
            return Err(DeviceError(ERR_NOT_ALIGNED));
        }
        self.write_at(at, &vec![ERASED_FILL; len as usize])
            .map_err(|err| io_error("erase", err))
    }

    fn program_size(&self) -> u32 {
        self.program_size
    }

    fn erase_size(&self) -> u32 {
        self.erase_size
    }
}
