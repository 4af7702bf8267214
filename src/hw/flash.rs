use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};

use heater_controller::params::{NvStorage, StorageError};

const CMD_JEDEC_ID: u8 = 0x9F;
const CMD_READ: u8 = 0x03;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_SECTOR_ERASE: u8 = 0x20;
const CMD_READ_STATUS: u8 = 0x05;

const STATUS_BUSY: u8 = 0x01;
const PAGE_SIZE: usize = 256;
const SECTOR_SIZE: usize = 4096;

/// Offset of the parameter sector.
const PARAMS_ADDR: u32 = 0;

pub struct W25qxx<'d, T: Instance, Tx, Rx> {
    spi: Spi<'d, T, Tx, Rx>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance, Tx, Rx> W25qxx<'d, T, Tx, Rx> {
    pub fn new(spi: Spi<'d, T, Tx, Rx>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    pub fn read_id(&mut self) -> Result<[u8; 3], Error> {
        let mut id = [0u8; 3];
        self.transaction(&[CMD_JEDEC_ID], |spi| spi.blocking_read(&mut id))?;
        Ok(id)
    }

    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.transaction(&command(CMD_READ, addr), |spi| spi.blocking_read(buf))
    }

    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error> {
        self.write_enable()?;
        self.transaction(&command(CMD_SECTOR_ERASE, addr), |_| Ok(()))?;
        self.wait_idle()
    }

    /// Program `data` starting at `addr`, split on page boundaries. The
    /// range must have been erased.
    pub fn program(&mut self, mut addr: u32, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let room = PAGE_SIZE - addr as usize % PAGE_SIZE;
            let (page, rest) = data.split_at(room.min(data.len()));
            self.write_enable()?;
            self.transaction(&command(CMD_PAGE_PROGRAM, addr), |spi| spi.blocking_write(page))?;
            self.wait_idle()?;
            addr += page.len() as u32;
            data = rest;
        }
        Ok(())
    }

    fn write_enable(&mut self) -> Result<(), Error> {
        self.transaction(&[CMD_WRITE_ENABLE], |_| Ok(()))
    }

    fn wait_idle(&mut self) -> Result<(), Error> {
        loop {
            let mut status = [0u8; 1];
            self.transaction(&[CMD_READ_STATUS], |spi| spi.blocking_read(&mut status))?;
            if status[0] & STATUS_BUSY == 0 {
                return Ok(());
            }
        }
    }

    fn transaction(
        &mut self,
        header: &[u8],
        body: impl FnOnce(&mut Spi<'d, T, Tx, Rx>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(header)
            .and_then(|()| body(&mut self.spi));
        self.cs.set_high();
        res
    }
}

fn command(cmd: u8, addr: u32) -> [u8; 4] {
    let a = addr.to_be_bytes();
    [cmd, a[1], a[2], a[3]]
}

impl<'d, T: Instance, Tx, Rx> NvStorage for W25qxx<'d, T, Tx, Rx> {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        if buf.len() > SECTOR_SIZE {
            return Err(StorageError::OutOfRange);
        }
        W25qxx::read(self, PARAMS_ADDR, buf).map_err(|_| StorageError::Io)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > SECTOR_SIZE {
            return Err(StorageError::OutOfRange);
        }
        self.erase_sector(PARAMS_ADDR)
            .and_then(|()| self.program(PARAMS_ADDR, data))
            .map_err(|_| StorageError::Io)
    }
}
