//! Tampon d'un seul secteur entre le système de fichiers et le support
//!
//! Toutes les lectures/écritures du FS passent par ici. `load` est le seul
//! endroit qui change le secteur en cache : un secteur modifié y est toujours
//! réécrit avant que le tampon serve pour un autre.

use alloc::vec;
use alloc::vec::Vec;

use crate::{BlockDevice, CacheMode, Error, Result};

pub struct SectorCache<D: BlockDevice> {
    device: D,
    mode: CacheMode,
    // (secteur, modifié)
    cached: Option<(u32, bool)>,
    data: Vec<u8>,
}

impl<D: BlockDevice> SectorCache<D> {
    pub fn new(device: D, mode: CacheMode) -> Self {
        let size = device.sector_size();
        Self {
            device,
            mode,
            cached: None,
            data: vec![0; size],
        }
    }

    pub fn sector_size(&self) -> usize {
        self.data.len()
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Secteur actuellement en cache et son état
    pub fn cached(&self) -> Option<(u32, bool)> {
        self.cached
    }

    /// Rend le support. Un secteur modifié non synchronisé est perdu.
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Écrire le secteur en cache s'il a été modifié
    pub fn sync(&mut self) -> Result<()> {
        if let Some((sector, true)) = self.cached {
            log::trace!("write-back secteur {}", sector);
            self.device.write_sector(sector, &self.data)?;
            self.cached = Some((sector, false));
        }
        Ok(())
    }

    fn load(&mut self, sector: u32, needs_read: bool) -> Result<&mut [u8]> {
        match self.cached {
            Some((cached, _)) if cached == sector => return Ok(&mut self.data),
            _ => {}
        }

        self.sync()?;
        if needs_read {
            self.cached = None;
            log::trace!("lecture secteur {}", sector);
            self.device.read_sector(sector, &mut self.data)?;
        }
        self.cached = Some((sector, false));
        Ok(&mut self.data)
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.data.len() {
            return Err(Error::BufferTooSmall);
        }
        Ok(())
    }

    pub fn read(&mut self, sector: u32, offset: usize, buffer: &mut [u8]) -> Result<()> {
        self.check(offset, buffer.len())?;
        let data = self.load(sector, true)?;
        buffer.copy_from_slice(&data[offset..offset + buffer.len()]);
        Ok(())
    }

    pub fn write(&mut self, sector: u32, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        // un secteur entièrement réécrit n'a pas besoin d'être lu
        let whole = offset == 0 && bytes.len() == self.data.len();
        let data = self.load(sector, !whole)?;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.cached = Some((sector, true));

        if self.mode == CacheMode::WriteThrough {
            self.sync()?;
        }
        Ok(())
    }

    /// Remplir tout un secteur avec `byte`
    pub fn fill(&mut self, sector: u32, byte: u8) -> Result<()> {
        let data = self.load(sector, false)?;
        data.fill(byte);
        self.cached = Some((sector, true));

        if self.mode == CacheMode::WriteThrough {
            self.sync()?;
        }
        Ok(())
    }

    /// Lire une suite d'octets qui peut déborder sur les secteurs suivants
    pub fn read_bytes(&mut self, base_sector: u32, offset: u32, buffer: &mut [u8]) -> Result<()> {
        let size = self.data.len() as u32;
        let mut done = 0;
        while done < buffer.len() {
            let pos = offset + done as u32;
            let in_sector = (pos % size) as usize;
            let chunk = (size as usize - in_sector).min(buffer.len() - done);
            self.read(base_sector + pos / size, in_sector, &mut buffer[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, base_sector: u32, offset: u32, bytes: &[u8]) -> Result<()> {
        let size = self.data.len() as u32;
        let mut done = 0;
        while done < bytes.len() {
            let pos = offset + done as u32;
            let in_sector = (pos % size) as usize;
            let chunk = (size as usize - in_sector).min(bytes.len() - done);
            self.write(base_sector + pos / size, in_sector, &bytes[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }
}
