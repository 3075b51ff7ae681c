//! Parcours et modification d'un répertoire

use alloc::string::String;
use alloc::vec::Vec;

use crate::directory::{
    short_name_to_string, Attributes, ShortEntry, Slot, DELETED, END_OF_DIR, ENTRY_SIZE,
};
use crate::filesystem::ClusterCursor;
use crate::long_name::{
    basis_name, long_name_slots, short_name_checksum, short_name_for, slot_count, validate_name,
    with_tail, LongNameBuilder,
};
use crate::volume::RootDir;
use crate::{BlockDevice, DateTime, Error, FatEntry, FileSystem, Result, Volume};

/// Un répertoire FAT ne dépasse pas 65536 emplacements
pub const MAX_DIR_ENTRIES: u32 = 65536;
const MAX_NAME_TAIL: u32 = 999_999;

/// Début d'un répertoire sur le disque
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirStart {
    /// Racine FAT12/16
    Fixed { first_sector: u32, entries: u16 },
    Chain(u32),
}

impl From<RootDir> for DirStart {
    fn from(root: RootDir) -> Self {
        match root {
            RootDir::Fixed { first_sector, entries } => Self::Fixed { first_sector, entries },
            RootDir::Cluster(cluster) => Self::Chain(cluster),
        }
    }
}

/// Où vit une entrée : sa suite d'emplacements dans le répertoire parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryLocation {
    pub dir: DirStart,
    /// Premier emplacement (fragment de nom long ou entrée courte)
    pub first_slot: u32,
    /// Emplacement de l'entrée courte
    pub slot: u32,
    pub sector: u32,
    pub offset: usize,
}

/// Entrée de répertoire décodée
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: String,
    pub(crate) short_name: [u8; 11],
    attributes: Attributes,
    first_cluster: u32,
    size: u32,
    created: DateTime,
    modified: DateTime,
    pub(crate) location: Option<EntryLocation>,
}

impl DirEntry {
    pub(crate) fn root(volume: &Volume) -> Self {
        let first_cluster = match volume.root {
            RootDir::Cluster(cluster) => cluster,
            RootDir::Fixed { .. } => 0,
        };
        Self {
            name: String::from("/"),
            short_name: [b' '; 11],
            attributes: Attributes::DIRECTORY,
            first_cluster,
            size: 0,
            created: DateTime::EPOCH,
            modified: DateTime::EPOCH,
            location: None,
        }
    }

    fn from_short(short: &ShortEntry, long_name: Option<String>, location: EntryLocation) -> Self {
        Self {
            name: long_name.unwrap_or_else(|| short.display_name()),
            short_name: short.name,
            attributes: short.attributes,
            first_cluster: short.first_cluster,
            size: short.size,
            created: short.created,
            modified: short.modified,
            location: Some(location),
        }
    }

    /// Nom long s'il existe, sinon le nom court
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nom 8.3 tel que stocké, en majuscules
    pub fn short_name(&self) -> String {
        short_name_to_string(&self.short_name, 0)
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn created(&self) -> DateTime {
        self.created
    }

    pub fn modified(&self) -> DateTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    /// Rang de l'entrée courte dans le dossier parent
    pub fn slot_index(&self) -> Option<u32> {
        self.location.map(|l| l.slot)
    }

    pub fn is_root(&self) -> bool {
        self.location.is_none()
    }

    /// "." ou ".."
    pub fn is_dot_entry(&self) -> bool {
        self.short_name == *b".          " || self.short_name == *b"..         "
    }

    /// Comparaison insensible à la casse sur le nom long et le nom court
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.name.to_lowercase() == name.to_lowercase()
            || self.short_name().eq_ignore_ascii_case(name)
    }
}

/// Répertoire ouvert. Emprunte le système de fichiers pendant sa durée de vie.
pub struct Dir<'a, D: BlockDevice> {
    fs: &'a mut FileSystem<D>,
    start: DirStart,
    index: u32,
    cursor: ClusterCursor,
}

impl<'a, D: BlockDevice> Dir<'a, D> {
    pub(crate) fn new(fs: &'a mut FileSystem<D>, start: DirStart) -> Self {
        Self {
            fs,
            start,
            index: 0,
            cursor: None,
        }
    }

    pub fn start(&self) -> DirStart {
        self.start
    }

    /// Revenir au début du répertoire
    pub fn reset(&mut self) {
        self.index = 0;
        self.cursor = None;
    }

    fn read_slot(&mut self, index: u32) -> Result<Option<([u8; ENTRY_SIZE], u32, usize)>> {
        let Some((sector, offset)) = self.fs.slot_position(self.start, index, &mut self.cursor)? else {
            return Ok(None);
        };
        let mut raw = [0u8; ENTRY_SIZE];
        self.fs.cache.read(sector, offset, &mut raw)?;
        Ok(Some((raw, sector, offset)))
    }

    /// Entrée suivante, `None` à la fin du répertoire
    pub fn read_next(&mut self) -> Result<Option<DirEntry>> {
        let mut names = LongNameBuilder::default();
        let mut first_slot = self.index;

        loop {
            let index = self.index;
            let Some((raw, sector, offset)) = self.read_slot(index)? else {
                return Ok(None);
            };

            match Slot::decode(&raw) {
                // on reste sur la marque de fin
                Slot::End => return Ok(None),
                Slot::Deleted => names.reset(),
                Slot::LongName(fragment) => {
                    if fragment.last {
                        first_slot = index;
                    }
                    names.push(&fragment);
                }
                Slot::Short(short) => {
                    self.index += 1;
                    let long_name = names.finish(&short.name);
                    if short.is_volume_id() {
                        continue;
                    }

                    let location = EntryLocation {
                        dir: self.start,
                        first_slot: if long_name.is_some() { first_slot } else { index },
                        slot: index,
                        sector,
                        offset,
                    };
                    return Ok(Some(DirEntry::from_short(&short, long_name, location)));
                }
            }
            self.index += 1;
        }
    }

    /// Toutes les entrées depuis le début
    pub fn list(&mut self) -> Result<Vec<DirEntry>> {
        self.reset();
        let mut entries = Vec::new();
        while let Some(entry) = self.read_next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Chercher une entrée par son nom (long ou court), sans tenir compte de la casse
    pub fn find(&mut self, name: &str) -> Result<Option<DirEntry>> {
        self.reset();
        while let Some(entry) = self.read_next()? {
            if entry.matches(name) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn create_file(&mut self, name: &str) -> Result<DirEntry> {
        self.create_entry(name, Attributes::ARCHIVE)
    }

    pub fn create_dir(&mut self, name: &str) -> Result<DirEntry> {
        self.create_entry(name, Attributes::DIRECTORY)
    }

    /// Créer une entrée. Un dossier reçoit tout de suite son cluster avec
    /// "." et "..", un fichier reste sans cluster jusqu'à la première écriture.
    pub fn create_entry(&mut self, name: &str, attributes: Attributes) -> Result<DirEntry> {
        validate_name(name)?;
        if self.find(name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let (short_name, case_flags, long) = match short_name_for(name) {
            Some((short_name, flags)) => (short_name, flags, false),
            None => (self.unique_short_name(name)?, 0, true),
        };
        let needed = if long { slot_count(name) as u32 } else { 1 };
        let first = self.find_free_run(needed)?;

        let now = self.fs.now();
        let first_cluster = if attributes.contains(Attributes::DIRECTORY) {
            let parent = self.parent_cluster();
            self.fs.new_dir_cluster(parent, now)?
        } else {
            0
        };

        let mut raw = [0u8; ENTRY_SIZE];
        let mut cursor = None;
        if long {
            let checksum = short_name_checksum(&short_name);
            for (i, fragment) in long_name_slots(name, checksum).iter().enumerate() {
                fragment.encode(&mut raw);
                let (sector, offset) = self.slot_at(first + i as u32, &mut cursor)?;
                self.fs.cache.write(sector, offset, &raw)?;
            }
        }

        let mut short = ShortEntry::new(short_name, attributes, first_cluster, now);
        short.case_flags = case_flags;
        short.encode(&mut raw);
        let slot = first + needed - 1;
        let (sector, offset) = self.slot_at(slot, &mut cursor)?;
        self.fs.cache.write(sector, offset, &raw)?;

        log::debug!("créé: {} ({})", name, short_name_to_string(&short_name, 0));
        self.reset();

        let location = EntryLocation {
            dir: self.start,
            first_slot: first,
            slot,
            sector,
            offset,
        };
        let long_name = long.then(|| String::from(name));
        Ok(DirEntry::from_short(&short, long_name, location))
    }

    /// Supprimer une entrée de ce répertoire
    pub fn delete(&mut self, entry: &DirEntry) -> Result<()> {
        self.fs.delete(entry)?;
        self.reset();
        Ok(())
    }

    fn slot_at(&mut self, index: u32, cursor: &mut ClusterCursor) -> Result<(u32, usize)> {
        self.fs
            .slot_position(self.start, index, cursor)?
            .ok_or(Error::CorruptChain)
    }

    /// Valeur de ".." pour un sous-dossier créé ici
    fn parent_cluster(&self) -> u32 {
        match (self.start, self.fs.volume.root) {
            (DirStart::Fixed { .. }, _) => 0,
            (DirStart::Chain(cluster), RootDir::Cluster(root)) if cluster == root => 0,
            (DirStart::Chain(cluster), _) => cluster,
        }
    }

    /// Plus petit suffixe ~N libre dans ce répertoire
    fn unique_short_name(&mut self, name: &str) -> Result<[u8; 11]> {
        let basis = basis_name(name);
        let existing: Vec<[u8; 11]> = self.list()?.into_iter().map(|e| e.short_name).collect();

        (1..=MAX_NAME_TAIL)
            .map(|n| with_tail(&basis, n))
            .find(|candidate| !existing.contains(candidate))
            .ok_or(Error::AlreadyExists)
    }

    /// Premier emplacement d'une suite de `count` emplacements libres.
    /// Un dossier en chaîne plein est agrandi d'un cluster vide.
    fn find_free_run(&mut self, count: u32) -> Result<u32> {
        let mut cursor = None;
        let mut index = 0;
        let mut run_start = 0;
        let mut run_len = 0;

        loop {
            if index >= MAX_DIR_ENTRIES {
                return Err(Error::DirectoryFull);
            }

            match self.fs.slot_position(self.start, index, &mut cursor)? {
                Some((sector, offset)) => {
                    let mut first_byte = [0u8; 1];
                    self.fs.cache.read(sector, offset, &mut first_byte)?;
                    if first_byte[0] == END_OF_DIR || first_byte[0] == DELETED {
                        if run_len == 0 {
                            run_start = index;
                        }
                        run_len += 1;
                        if run_len == count {
                            return Ok(run_start);
                        }
                    } else {
                        run_len = 0;
                    }
                    index += 1;
                }
                None => match self.start {
                    DirStart::Fixed { .. } => return Err(Error::DirectoryFull),
                    DirStart::Chain(first) => {
                        let last = cursor.map_or(first, |(_, cluster)| cluster);
                        self.extend(last)?;
                    }
                },
            }
        }
    }

    /// Ajoute un cluster vide en fin de chaîne. Il est mis à zéro avant
    /// d'être relié.
    fn extend(&mut self, last: u32) -> Result<()> {
        let cluster = self.fs.fat().allocate_cluster(None)?;
        self.fs.zero_cluster(cluster)?;
        self.fs.fat().set_entry(last, FatEntry::Next(cluster))?;
        log::debug!("dossier agrandi: {} -> {}", last, cluster);
        Ok(())
    }
}
