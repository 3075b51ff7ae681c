//! Géométrie d'un volume monté et état d'allocation

use byteorder::{ByteOrder, LittleEndian};

use crate::{BootSector, FatType};

/// Emplacement du répertoire racine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootDir {
    /// FAT12/16 : zone fixe juste avant le cluster 2
    Fixed { first_sector: u32, entries: u16 },
    /// FAT32 : chaîne de clusters ordinaire
    Cluster(u32),
}

/// Descripteur du système de fichiers monté. Tous les numéros de secteur
/// sont absolus (début de partition inclus).
#[derive(Debug, Clone)]
pub struct Volume {
    pub fat_type: FatType,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u8,
    pub sectors_per_fat: u32,
    pub fat_start: u32,
    pub data_start: u32,
    pub root: RootDir,
    pub cluster_count: u32,
    /// Seule FAT à écrire quand le miroir FAT32 est désactivé
    pub active_fat: Option<u8>,
    pub fs_info_sector: Option<u32>,
    pub(crate) free_clusters: Option<u32>,
    pub(crate) next_free: u32,
    pub(crate) fs_info_dirty: bool,
}

impl Volume {
    pub fn from_boot_sector(bs: &BootSector, partition_start: u32) -> Self {
        let fat_type = bs.fat_type();
        let root = match fat_type {
            FatType::Fat32 => RootDir::Cluster(bs.root_cluster),
            _ => RootDir::Fixed {
                first_sector: partition_start + bs.first_root_dir_sector(),
                entries: bs.root_entry_count,
            },
        };

        let (active_fat, fs_info_sector) = match fat_type {
            FatType::Fat32 => {
                // bit 7 : miroir désactivé, bits 0-3 : FAT active
                let active = (bs.ext_flags & 0x80 != 0).then_some((bs.ext_flags & 0x0f) as u8);
                let fs_info = (bs.fs_info != 0 && bs.fs_info != 0xFFFF
                    && (bs.fs_info as u32) < bs.reserved_sector_count as u32)
                    .then_some(partition_start + bs.fs_info as u32);
                (active, fs_info)
            }
            _ => (None, None),
        };

        Self {
            fat_type,
            bytes_per_sector: bs.bytes_per_sector as u32,
            sectors_per_cluster: bs.sectors_per_cluster as u32,
            reserved_sectors: bs.reserved_sector_count as u32,
            fat_count: bs.num_fats,
            sectors_per_fat: bs.fat_size(),
            fat_start: partition_start + bs.first_fat_sector(),
            data_start: partition_start + bs.first_data_sector(),
            root,
            cluster_count: bs.cluster_count(),
            active_fat: active_fat.filter(|&a| a < bs.num_fats),
            fs_info_sector,
            free_clusters: None,
            next_free: 2,
            fs_info_dirty: false,
        }
    }

    /// Taille d'un cluster en octets
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    pub fn first_sector_of_cluster(&self, cluster: u32) -> u32 {
        self.data_start + (cluster - 2) * self.sectors_per_cluster
    }

    /// Dernier numéro de cluster utilisable
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster <= self.max_cluster()
    }

    /// Taille des données en octets
    pub fn size(&self) -> u64 {
        self.cluster_count as u64 * self.cluster_size() as u64
    }

    /// Compteur de clusters libres, approximatif, `None` si inconnu
    pub fn free_clusters(&self) -> Option<u32> {
        self.free_clusters
    }

    pub fn next_free_hint(&self) -> u32 {
        self.next_free
    }

    pub(crate) fn set_free_clusters(&mut self, free: u32) {
        if self.free_clusters != Some(free) {
            self.free_clusters = Some(free);
            self.fs_info_dirty = true;
        }
    }

    pub(crate) fn set_next_free(&mut self, cluster: u32) {
        let cluster = if self.is_data_cluster(cluster) { cluster } else { 2 };
        if self.next_free != cluster {
            self.next_free = cluster;
            self.fs_info_dirty = true;
        }
    }

    /// Prend en compte un secteur FSInfo lu au montage
    pub(crate) fn apply_fs_info(&mut self, info: FsInfo) {
        if let Some(free) = info.free_count.filter(|&f| f <= self.cluster_count) {
            self.free_clusters = Some(free);
        }
        if let Some(next) = info.next_free.filter(|&n| self.is_data_cluster(n)) {
            self.next_free = next;
        }
    }
}

const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
const FSINFO_STRUC_SIG: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIG: u32 = 0xAA55_0000;
const FSINFO_UNKNOWN: u32 = 0xFFFF_FFFF;

/// Secteur FSInfo de FAT32
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: Option<u32>,
    pub next_free: Option<u32>,
}

impl FsInfo {
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if sector.len() < 512
            || LittleEndian::read_u32(&sector[0..4]) != FSINFO_LEAD_SIG
            || LittleEndian::read_u32(&sector[484..488]) != FSINFO_STRUC_SIG
            || LittleEndian::read_u32(&sector[508..512]) != FSINFO_TRAIL_SIG
        {
            return None;
        }

        let known = |v: u32| (v != FSINFO_UNKNOWN).then_some(v);
        Some(Self {
            free_count: known(LittleEndian::read_u32(&sector[488..492])),
            next_free: known(LittleEndian::read_u32(&sector[492..496])),
        })
    }

    /// Réécrit les deux compteurs sans toucher aux signatures
    pub fn encode_counters(&self, sector: &mut [u8]) {
        LittleEndian::write_u32(&mut sector[488..492], self.free_count.unwrap_or(FSINFO_UNKNOWN));
        LittleEndian::write_u32(&mut sector[492..496], self.next_free.unwrap_or(FSINFO_UNKNOWN));
    }
}
