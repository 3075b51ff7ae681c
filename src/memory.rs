//! Support en mémoire, utilisé pour les tests et les images

use alloc::vec;
use alloc::vec::Vec;

use crate::{BlockDevice, Error, IoError, Result};

pub struct MemoryDevice {
    data: Vec<u8>,
    sector_size: usize,
    reads: usize,
    writes: usize,
}

impl MemoryDevice {
    pub fn new(sector_count: u32, sector_size: usize) -> Self {
        Self::from_image(vec![0; sector_count as usize * sector_size], sector_size)
    }

    /// L'image est tronquée à un nombre entier de secteurs.
    pub fn from_image(mut data: Vec<u8>, sector_size: usize) -> Self {
        let whole = data.len() - data.len() % sector_size;
        data.truncate(whole);
        Self {
            data,
            sector_size,
            reads: 0,
            writes: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Nombre de lectures de secteur servies
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Nombre d'écritures de secteur reçues
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn range(&self, sector: u32, len: usize) -> Result<core::ops::Range<usize>> {
        if len != self.sector_size {
            return Err(Error::BufferTooSmall);
        }
        let start = sector as usize * self.sector_size;
        let end = start + self.sector_size;
        if end > self.data.len() {
            return Err(Error::Io(IoError::OutOfRange));
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemoryDevice {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8]) -> Result<()> {
        let range = self.range(sector, buffer.len())?;
        buffer.copy_from_slice(&self.data[range]);
        self.reads += 1;
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, buffer: &[u8]) -> Result<()> {
        let range = self.range(sector, buffer.len())?;
        self.data[range].copy_from_slice(buffer);
        self.writes += 1;
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u32 {
        (self.data.len() / self.sector_size) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range() {
        let mut dev = MemoryDevice::new(4, 512);
        let mut buf = [0u8; 512];
        assert!(dev.read_sector(3, &mut buf).is_ok());
        assert_eq!(dev.read_sector(4, &mut buf), Err(Error::Io(IoError::OutOfRange)));
        assert_eq!(dev.sector_count(), 4);
    }

    #[test]
    fn test_wrong_buffer_len() {
        let mut dev = MemoryDevice::new(4, 512);
        let mut buf = [0u8; 100];
        assert_eq!(dev.read_sector(0, &mut buf), Err(Error::BufferTooSmall));
    }
}
