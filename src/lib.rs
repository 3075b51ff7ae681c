//! Pile de stockage embarquée : pilote SD/MMC en mode SPI, table de
//! partitions MBR et système de fichiers FAT12/16/32 en lecture/écriture.
//!
//! # Ressources
//!
//! - <https://wiki.osdev.org/FAT>
//! - <https://academy.cba.mit.edu/classes/networking_communications/SD/FAT.pdf>
//! - <http://elm-chan.org/docs/mmc/mmc_e.html>

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod boot_sector;
pub mod buffer;
pub mod card_info;
pub mod config;
pub mod crc;
pub mod dir;
pub mod directory;
pub mod error;
pub mod fat_table;
pub mod file;
pub mod filesystem;
pub mod long_name;
pub mod memory;
pub mod partition;
pub mod sdcard;
pub mod time;
pub mod volume;

pub use boot_sector::{BootSector, FatType};
pub use buffer::SectorCache;
pub use card_info::CardInfo;
pub use config::{CacheMode, CardConfig, MountOptions};
pub use dir::{Dir, DirEntry};
pub use directory::Attributes;
pub use error::{Error, IoError, Result};
pub use fat_table::{FatEntry, FatTable};
pub use file::{File, SeekFrom};
pub use filesystem::FileSystem;
pub use memory::MemoryDevice;
pub use partition::{Partition, PartitionSelector};
pub use sdcard::{CardType, SdCard, SpiTransport};
pub use time::{DateTime, TimeSource};
pub use volume::Volume;

/// Accès secteur par secteur à un support linéaire.
///
/// `buffer` fait toujours exactement `sector_size()` octets.
pub trait BlockDevice {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8]) -> Result<()>;
    fn write_sector(&mut self, sector: u32, buffer: &[u8]) -> Result<()>;
    fn sector_size(&self) -> usize;
    /// Nombre total de secteurs du support
    fn sector_count(&self) -> u32;
}
