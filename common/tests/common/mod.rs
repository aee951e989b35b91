#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use greenhouse_common::{
    block_device::{BlockDevice, FlashLimits, FlashPlatform},
    error::DeviceError,
};

pub const FAULT: DeviceError = DeviceError(-5);

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Program { offset: u32, len: usize },
    Erase { offset: u32, len: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct SimGeometry {
    pub start_address: u32,
    pub available_size: u32,
    pub sector_size: Option<u32>,
    pub program_size: u32,
    pub erase_size: u32,
}

impl Default for SimGeometry {
    fn default() -> Self {
        Self {
            start_address: 0x0810_0000,
            available_size: 64 * 1024,
            sector_size: Some(4096),
            program_size: 16,
            erase_size: 4096,
        }
    }
}

/// Flash contents that outlive any one store, so a test can "reboot" by
/// initializing a fresh store against the same chip.
pub struct Chip {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// Next program writes only this many bytes, then reports a fault.
    pub tear_next_program: Option<usize>,
    pub operations: Vec<Operation>,
    pub opens: usize,
}

impl Chip {
    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn fail_from_now(&mut self) {
        self.fail_after_operation = self.operations.len();
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn programs(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Program { .. }))
            .count()
    }

    fn fault_due(&self) -> bool {
        self.operations.len() >= self.fail_after_operation
    }

    fn check(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, DeviceError> {
        let start = offset as usize;
        let end = start + len;
        if end > self.buf.len() {
            return Err(DeviceError(-3));
        }
        Ok(start..end)
    }
}

pub struct SimPlatform {
    chip: Rc<RefCell<Chip>>,
    pub geometry: SimGeometry,
}

impl SimPlatform {
    pub fn new(geometry: SimGeometry) -> Self {
        let chip = Chip {
            buf: vec![0xFF; geometry.available_size as usize],
            fail_after_operation: usize::MAX,
            tear_next_program: None,
            operations: Vec::new(),
            opens: 0,
        };
        Self {
            chip: Rc::new(RefCell::new(chip)),
            geometry,
        }
    }

    /// Same chip, fresh platform handle.
    pub fn reboot(&self) -> Self {
        Self {
            chip: Rc::clone(&self.chip),
            geometry: self.geometry,
        }
    }

    pub fn chip(&self) -> std::cell::RefMut<'_, Chip> {
        self.chip.borrow_mut()
    }
}

impl FlashPlatform for SimPlatform {
    type Device = SimDevice;

    fn limits(&mut self) -> FlashLimits {
        FlashLimits {
            flash_size: 2 * 1024 * 1024,
            start_address: self.geometry.start_address,
            available_size: self.geometry.available_size,
        }
    }

    fn sector_size(&mut self, _address: u32) -> Option<u32> {
        self.geometry.sector_size
    }

    fn open(&mut self, _start_address: u32, size: u32) -> Result<SimDevice, DeviceError> {
        let mut chip = self.chip.borrow_mut();
        chip.opens += 1;
        if size as usize > chip.buf.len() {
            return Err(DeviceError(-3));
        }
        Ok(SimDevice {
            chip: Rc::clone(&self.chip),
            program_size: self.geometry.program_size,
            erase_size: self.geometry.erase_size,
        })
    }
}

pub struct SimDevice {
    chip: Rc<RefCell<Chip>>,
    program_size: u32,
    erase_size: u32,
}

impl BlockDevice for SimDevice {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut chip = self.chip.borrow_mut();
        if chip.fault_due() {
            return Err(FAULT);
        }
        chip.operations.push(Operation::Read {
            offset,
            len: buf.len(),
        });
        let range = chip.check(offset, buf.len())?;
        buf.copy_from_slice(&chip.buf[range]);
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        let mut chip = self.chip.borrow_mut();
        if chip.fault_due() {
            return Err(FAULT);
        }
        chip.operations.push(Operation::Program {
            offset,
            len: data.len(),
        });
        let range = chip.check(offset, data.len())?;
        let written = chip.tear_next_program.take().unwrap_or(data.len());

        // NOR semantics: programming only clears bits.
        for (cell, byte) in chip.buf[range].iter_mut().zip(data).take(written) {
            *cell &= *byte;
        }

        if written < data.len() {
            Err(FAULT)
        } else {
            Ok(())
        }
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), DeviceError> {
        let mut chip = self.chip.borrow_mut();
        if chip.fault_due() {
            return Err(FAULT);
        }
        chip.operations.push(Operation::Erase { offset, len });
        let range = chip.check(offset, len as usize)?;
        chip.buf[range].fill(0xFF);
        Ok(())
    }

    fn program_size(&self) -> u32 {
        self.program_size
    }

    fn erase_size(&self) -> u32 {
        self.erase_size
    }
}
