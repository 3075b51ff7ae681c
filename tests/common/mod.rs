// Construction d'images FAT en mémoire pour les tests
#![allow(dead_code)]

use sdfat::MemoryDevice;

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub sectors_per_cluster: u8,
    pub reserved: u16,
    pub fats: u8,
    pub root_entries: u16,
    pub sectors_per_fat: u32,
    pub total_sectors: u32,
    pub fat32: bool,
}

impl Geometry {
    /// 2 secteurs réservés, 1 FAT de 4 secteurs, clusters de 4 secteurs
    /// (~1000 clusters, donc FAT12)
    pub fn small() -> Self {
        Self {
            sectors_per_cluster: 4,
            reserved: 2,
            fats: 1,
            root_entries: 512,
            sectors_per_fat: 4,
            total_sectors: 4096,
            fat32: false,
        }
    }

    /// Clusters d'un secteur, racine de 16 entrées
    pub fn tiny_root() -> Self {
        Self {
            sectors_per_cluster: 1,
            reserved: 1,
            fats: 2,
            root_entries: 16,
            sectors_per_fat: 2,
            total_sectors: 300,
            fat32: false,
        }
    }

    pub fn fat16() -> Self {
        Self {
            sectors_per_cluster: 1,
            reserved: 1,
            fats: 2,
            root_entries: 512,
            sectors_per_fat: 78,
            total_sectors: 20_000,
            fat32: false,
        }
    }

    pub fn fat32() -> Self {
        Self {
            sectors_per_cluster: 1,
            reserved: 32,
            fats: 2,
            root_entries: 0,
            sectors_per_fat: 546,
            total_sectors: 70_000,
            fat32: true,
        }
    }

    pub fn data_start(&self) -> u32 {
        let root_sectors = (self.root_entries as u32 * 32).div_ceil(512);
        self.reserved as u32 + self.fats as u32 * self.sectors_per_fat + root_sectors
    }

    pub fn cluster_count(&self) -> u32 {
        (self.total_sectors - self.data_start()) / self.sectors_per_cluster as u32
    }
}

/// Formate un volume sans table de partitions
pub fn format(g: &Geometry) -> Vec<u8> {
    let mut data = vec![0u8; g.total_sectors as usize * 512];
    let bs = &mut data[..512];

    bs[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    bs[3..11].copy_from_slice(b"MSWIN4.1");
    bs[11..13].copy_from_slice(&512u16.to_le_bytes());
    bs[13] = g.sectors_per_cluster;
    bs[14..16].copy_from_slice(&g.reserved.to_le_bytes());
    bs[16] = g.fats;
    bs[17..19].copy_from_slice(&g.root_entries.to_le_bytes());
    if g.total_sectors < 0x10000 && !g.fat32 {
        bs[19..21].copy_from_slice(&(g.total_sectors as u16).to_le_bytes());
    } else {
        bs[32..36].copy_from_slice(&g.total_sectors.to_le_bytes());
    }
    bs[21] = 0xF8;
    if g.fat32 {
        bs[36..40].copy_from_slice(&g.sectors_per_fat.to_le_bytes());
        bs[44..48].copy_from_slice(&2u32.to_le_bytes());
        bs[48..50].copy_from_slice(&1u16.to_le_bytes());
        bs[50..52].copy_from_slice(&6u16.to_le_bytes());
        bs[66] = 0x29;
    } else {
        bs[22..24].copy_from_slice(&(g.sectors_per_fat as u16).to_le_bytes());
        bs[38] = 0x29;
    }
    bs[510] = 0x55;
    bs[511] = 0xAA;

    let head: &[u8] = if g.fat32 {
        // entrées 0 et 1, puis la racine (cluster 2) en fin de chaîne
        &[0xF8, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F]
    } else if g.cluster_count() < 4085 {
        &[0xF8, 0xFF, 0xFF]
    } else {
        &[0xF8, 0xFF, 0xFF, 0xFF]
    };
    for fat in 0..g.fats as u32 {
        let base = (g.reserved as u32 + fat * g.sectors_per_fat) as usize * 512;
        data[base..base + head.len()].copy_from_slice(head);
    }

    if g.fat32 {
        let info = &mut data[512..1024];
        info[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
        info[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
        info[488..492].copy_from_slice(&(g.cluster_count() - 1).to_le_bytes());
        info[492..496].copy_from_slice(&3u32.to_le_bytes());
        info[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
    }

    data
}

/// Place un volume derrière un MBR, dans l'entrée 0
pub fn with_mbr(volume: Vec<u8>, start: u32, kind: u8) -> Vec<u8> {
    let count = (volume.len() / 512) as u32;
    let mut data = vec![0u8; start as usize * 512];
    let entry = &mut data[0x1BE..0x1CE];
    entry[4] = kind;
    entry[8..12].copy_from_slice(&start.to_le_bytes());
    entry[12..16].copy_from_slice(&count.to_le_bytes());
    data[510] = 0x55;
    data[511] = 0xAA;
    data.extend_from_slice(&volume);
    data
}

pub fn device(g: &Geometry) -> MemoryDevice {
    MemoryDevice::from_image(format(g), 512)
}

/// Contenu déterministe pour les tests d'écriture
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
