//! Gestion de la table FAT

use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

use crate::{BlockDevice, Error, FatType, Result, SectorCache, Volume};

/// Valeur décodée d'une entrée de FAT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(u32),
    Bad,
    EndOfChain,
    /// Valeur 1, jamais valide dans une chaîne
    Reserved,
}

impl FatEntry {
    pub fn decode(raw: u32, fat_type: FatType) -> Self {
        let (bad, eoc) = match fat_type {
            FatType::Fat12 => (0xFF7, 0xFF8),
            FatType::Fat16 => (0xFFF7, 0xFFF8),
            FatType::Fat32 => (0x0FFF_FFF7, 0x0FFF_FFF8),
        };
        match raw {
            0 => Self::Free,
            1 => Self::Reserved,
            r if r == bad => Self::Bad,
            r if r >= eoc => Self::EndOfChain,
            r => Self::Next(r),
        }
    }

    pub fn encode(self, fat_type: FatType) -> u32 {
        let mask = match fat_type {
            FatType::Fat12 => 0xFFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        };
        match self {
            Self::Free => 0,
            Self::Reserved => 1,
            Self::Next(n) => n & mask,
            Self::Bad => mask - 8,
            Self::EndOfChain => mask,
        }
    }
}

/// Lit l'entrée paire (`odd == false`) ou impaire d'une paire FAT12
/// stockée sur 3 octets.
pub fn unpack12(window: &[u8; 3], odd: bool) -> u16 {
    if odd {
        (window[1] >> 4) as u16 | (window[2] as u16) << 4
    } else {
        window[0] as u16 | ((window[1] & 0x0f) as u16) << 8
    }
}

/// Écrit une entrée FAT12 sans toucher à sa voisine
pub fn pack12(window: &mut [u8; 3], odd: bool, value: u16) {
    let value = value & 0x0fff;
    if odd {
        window[1] = (window[1] & 0x0f) | ((value << 4) as u8 & 0xf0);
        window[2] = (value >> 4) as u8;
    } else {
        window[0] = value as u8;
        window[1] = (window[1] & 0xf0) | ((value >> 8) as u8 & 0x0f);
    }
}

/// Accès à la FAT à travers le tampon de secteur du volume
pub struct FatTable<'a, D: BlockDevice> {
    cache: &'a mut SectorCache<D>,
    volume: &'a mut Volume,
}

impl<'a, D: BlockDevice> FatTable<'a, D> {
    pub fn new(cache: &'a mut SectorCache<D>, volume: &'a mut Volume) -> Self {
        Self { cache, volume }
    }

    fn fat_bytes(&self) -> u32 {
        self.volume.sectors_per_fat * self.volume.bytes_per_sector
    }

    fn read_raw(&mut self, base: u32, cluster: u32) -> Result<u32> {
        match self.volume.fat_type {
            FatType::Fat12 => {
                let mut window = [0u8; 3];
                let offset = (cluster / 2) * 3;
                let len = (self.fat_bytes() - offset).min(3) as usize;
                self.cache.read_bytes(base, offset, &mut window[..len])?;
                Ok(unpack12(&window, cluster & 1 == 1) as u32)
            }
            FatType::Fat16 => {
                let mut bytes = [0u8; 2];
                self.cache.read_bytes(base, cluster * 2, &mut bytes)?;
                Ok(LittleEndian::read_u16(&bytes) as u32)
            }
            FatType::Fat32 => {
                let mut bytes = [0u8; 4];
                self.cache.read_bytes(base, cluster * 4, &mut bytes)?;
                // Seulement 28 bits utilisés
                Ok(LittleEndian::read_u32(&bytes) & 0x0FFF_FFFF)
            }
        }
    }

    fn write_raw(&mut self, base: u32, cluster: u32, value: u32) -> Result<()> {
        match self.volume.fat_type {
            FatType::Fat12 => {
                let mut window = [0u8; 3];
                let offset = (cluster / 2) * 3;
                let len = (self.fat_bytes() - offset).min(3) as usize;
                self.cache.read_bytes(base, offset, &mut window[..len])?;
                pack12(&mut window, cluster & 1 == 1, value as u16);
                self.cache.write_bytes(base, offset, &window[..len])
            }
            FatType::Fat16 => {
                let mut bytes = [0u8; 2];
                LittleEndian::write_u16(&mut bytes, value as u16);
                self.cache.write_bytes(base, cluster * 2, &bytes)
            }
            FatType::Fat32 => {
                let mut bytes = [0u8; 4];
                self.cache.read_bytes(base, cluster * 4, &mut bytes)?;
                // les 4 bits de poids fort sont réservés et conservés
                let old = LittleEndian::read_u32(&bytes);
                LittleEndian::write_u32(&mut bytes, (old & 0xF000_0000) | (value & 0x0FFF_FFFF));
                self.cache.write_bytes(base, cluster * 4, &bytes)
            }
        }
    }

    fn fat_base(&self, index: u8) -> u32 {
        self.volume.fat_start + index as u32 * self.volume.sectors_per_fat
    }

    /// Lire l'entrée d'un cluster (dans la FAT active)
    pub fn entry(&mut self, cluster: u32) -> Result<FatEntry> {
        if cluster > self.volume.max_cluster() {
            return Err(Error::InvalidCluster);
        }
        let base = self.fat_base(self.volume.active_fat.unwrap_or(0));
        let raw = self.read_raw(base, cluster)?;
        Ok(FatEntry::decode(raw, self.volume.fat_type))
    }

    /// Écrire une entrée dans chaque copie de la FAT. Toutes les copies sont
    /// tentées, la première erreur est rendue sans retour arrière.
    pub fn set_entry(&mut self, cluster: u32, entry: FatEntry) -> Result<()> {
        if !self.volume.is_data_cluster(cluster) {
            return Err(Error::InvalidCluster);
        }
        let value = entry.encode(self.volume.fat_type);

        let mut result = Ok(());
        for index in 0..self.volume.fat_count {
            if self.volume.active_fat.is_some_and(|active| active != index) {
                continue;
            }
            let base = self.fat_base(index);
            if let Err(e) = self.write_raw(base, cluster, value) {
                log::warn!("écriture de la FAT {} échouée pour le cluster {}: {}", index, cluster, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Obtenir le cluster suivant dans la chaîne, `None` en fin de chaîne
    pub fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>> {
        // Les clusters commencent à 2
        if !self.volume.is_data_cluster(cluster) {
            return Err(Error::InvalidCluster);
        }

        match self.entry(cluster)? {
            FatEntry::Next(next) if self.volume.is_data_cluster(next) => Ok(Some(next)),
            FatEntry::EndOfChain => Ok(None),
            other => {
                log::warn!("chaîne corrompue: cluster {} -> {:?}", cluster, other);
                Err(Error::CorruptChain)
            }
        }
    }

    /// Obtenir tous les clusters d'une chaîne
    pub fn cluster_chain(&mut self, start_cluster: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut current = start_cluster;

        loop {
            // une chaîne plus longue que le volume boucle forcément
            if chain.len() as u32 >= self.volume.cluster_count {
                return Err(Error::CorruptChain);
            }
            chain.push(current);

            match self.next_cluster(current)? {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(chain)
    }

    /// Réserve un cluster libre et l'accroche derrière `previous`.
    ///
    /// La recherche part de l'indice mémorisé et reboucle sur le cluster 2.
    /// Le nouveau cluster est marqué fin de chaîne avant que `previous` ne
    /// pointe dessus.
    pub fn allocate_cluster(&mut self, previous: Option<u32>) -> Result<u32> {
        let max = self.volume.max_cluster();
        let start = match self.volume.next_free {
            hint if self.volume.is_data_cluster(hint) => hint,
            _ => 2,
        };

        let mut cluster = start;
        loop {
            if self.entry(cluster)? == FatEntry::Free {
                self.set_entry(cluster, FatEntry::EndOfChain)?;
                if let Some(previous) = previous {
                    self.set_entry(previous, FatEntry::Next(cluster))?;
                }

                self.volume.set_next_free(cluster + 1);
                if let Some(free) = self.volume.free_clusters {
                    self.volume.set_free_clusters(free.saturating_sub(1));
                }
                log::trace!("cluster {} alloué", cluster);
                return Ok(cluster);
            }

            cluster = if cluster >= max { 2 } else { cluster + 1 };
            if cluster == start {
                break;
            }
        }

        self.volume.set_free_clusters(0);
        Err(Error::NoSpace)
    }

    /// Libère toute une chaîne. S'arrête sur un cluster déjà libre ou sur la
    /// fin de chaîne ; rend le nombre de clusters libérés.
    pub fn free_chain(&mut self, start_cluster: u32) -> Result<u32> {
        let mut cluster = start_cluster;
        let mut freed = 0;

        while self.volume.is_data_cluster(cluster) && freed < self.volume.cluster_count {
            let entry = self.entry(cluster)?;
            if entry == FatEntry::Free {
                break;
            }
            self.set_entry(cluster, FatEntry::Free)?;
            freed += 1;

            match entry {
                FatEntry::Next(next) => cluster = next,
                _ => break,
            }
        }

        if let Some(free) = self.volume.free_clusters {
            let free = (free + freed).min(self.volume.cluster_count);
            self.volume.set_free_clusters(free);
        }
        Ok(freed)
    }

    /// Coupe la chaîne après `cluster` et libère la suite
    pub fn truncate_after(&mut self, cluster: u32) -> Result<u32> {
        let entry = self.entry(cluster)?;
        self.set_entry(cluster, FatEntry::EndOfChain)?;
        match entry {
            FatEntry::Next(next) => self.free_chain(next),
            _ => Ok(0),
        }
    }

    /// Compte réellement les clusters libres et met à jour le compteur
    pub fn rescan_free_clusters(&mut self) -> Result<u32> {
        let mut free = 0;
        for cluster in 2..=self.volume.max_cluster() {
            if self.entry(cluster)? == FatEntry::Free {
                free += 1;
            }
        }
        self.volume.set_free_clusters(free);
        Ok(free)
    }
}
