use byteorder::{ByteOrder, LittleEndian};

use crate::Error;
use crate::Result;

// bootsecteur FAT12/16/32

/// Type de FAT, déduit uniquement du nombre de clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn from_cluster_count(clusters: u32) -> Self {
        if clusters < 4085 {
            Self::Fat12
        } else if clusters < 65525 {
            Self::Fat16
        } else {
            Self::Fat32
        }
    }

    /// Largeur d'une entrée de FAT en bits
    pub fn bits(&self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 32,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub fat_size_16: u16,
    pub total_sectors_32: u32,
    // FAT32 spécifique, sans signification si fat_size_16 != 0
    pub fat_size_32: u32,
    pub ext_flags: u16,
    pub root_cluster: u32,
    pub fs_info: u16,
}

impl BootSector {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            return Err(Error::InvalidBootSector);
        }

        Ok(Self {
            bytes_per_sector: LittleEndian::read_u16(&data[11..13]),
            sectors_per_cluster: data[13],
            reserved_sector_count: LittleEndian::read_u16(&data[14..16]),
            num_fats: data[16],
            root_entry_count: LittleEndian::read_u16(&data[17..19]),
            total_sectors_16: LittleEndian::read_u16(&data[19..21]),
            fat_size_16: LittleEndian::read_u16(&data[22..24]),
            total_sectors_32: LittleEndian::read_u32(&data[32..36]),
            fat_size_32: LittleEndian::read_u32(&data[36..40]),
            ext_flags: LittleEndian::read_u16(&data[40..42]),
            root_cluster: LittleEndian::read_u32(&data[44..48]),
            fs_info: LittleEndian::read_u16(&data[48..50]),
        })
    }

    /// Vérifier que le boot sector est cohérent
    pub fn validate(&self) -> Result<()> {
        // secteur vide ou qui n'est pas un boot sector
        if self.bytes_per_sector == 0 || self.sectors_per_cluster == 0 {
            return Err(Error::InvalidBootSector);
        }

        if !matches!(self.bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(Error::UnsupportedSectorSize);
        }

        if !self.sectors_per_cluster.is_power_of_two() {
            return Err(Error::InvalidBootSector);
        }

        if self.reserved_sector_count == 0 || self.num_fats == 0 {
            return Err(Error::InvalidBootSector);
        }

        if self.fat_size() == 0 || self.total_sectors() == 0 {
            return Err(Error::InvalidBootSector);
        }

        if self.total_sectors() <= self.first_data_sector() {
            return Err(Error::InvalidBootSector);
        }

        let clusters = self.cluster_count();
        if clusters == 0 {
            return Err(Error::InvalidBootSector);
        }

        match self.fat_type() {
            FatType::Fat32 => {
                if self.root_entry_count != 0 || self.root_cluster < 2 {
                    return Err(Error::InvalidBootSector);
                }
            }
            _ => {
                if self.root_entry_count == 0 {
                    return Err(Error::InvalidBootSector);
                }
            }
        }

        // la FAT doit pouvoir décrire tous les clusters
        let fat_bits = self.fat_size() as u64 * self.bytes_per_sector as u64 * 8;
        if fat_bits / (self.fat_type().bits() as u64) < clusters as u64 + 2 {
            return Err(Error::InvalidBootSector);
        }

        Ok(())
    }

    /// Taille d'un cluster en octets
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Taille de la FAT
    pub fn fat_size(&self) -> u32 {
        if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        }
    }

    /// Nombre total de secteurs
    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    /// Secteurs occupés par le répertoire racine fixe (0 en FAT32)
    pub fn root_dir_sectors(&self) -> u32 {
        let bytes = self.root_entry_count as u32 * 32;
        bytes.div_ceil(self.bytes_per_sector as u32)
    }

    /// Premier secteur de la FAT
    pub fn first_fat_sector(&self) -> u32 {
        self.reserved_sector_count as u32
    }

    pub fn first_root_dir_sector(&self) -> u32 {
        self.reserved_sector_count as u32 + self.num_fats as u32 * self.fat_size()
    }

    /// Premier secteur de données
    pub fn first_data_sector(&self) -> u32 {
        self.first_root_dir_sector() + self.root_dir_sectors()
    }

    pub fn cluster_count(&self) -> u32 {
        self.total_sectors().saturating_sub(self.first_data_sector()) / self.sectors_per_cluster as u32
    }

    pub fn fat_type(&self) -> FatType {
        FatType::from_cluster_count(self.cluster_count())
    }
}
