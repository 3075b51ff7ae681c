//! Fichier ouvert : lecture, écriture, déplacement

use crate::dir::EntryLocation;
use crate::directory::{Attributes, ShortEntry, ENTRY_SIZE};
use crate::filesystem::ClusterCursor;
use crate::{BlockDevice, DirEntry, Error, FileSystem, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

/// Fichier ouvert. Les métadonnées ne sont écrites que par `flush`/`close`.
pub struct File<'a, D: BlockDevice> {
    fs: &'a mut FileSystem<D>,
    location: EntryLocation,
    first_cluster: u32,
    size: u32,
    pos: u32,
    cursor: ClusterCursor,
    dirty: bool,
}

impl<'a, D: BlockDevice> File<'a, D> {
    pub(crate) fn open(fs: &'a mut FileSystem<D>, entry: &DirEntry) -> Result<Self> {
        let location = entry.location.ok_or(Error::IsADirectory)?;
        // taille et premier cluster relus : `entry` peut être périmée
        let on_disk = fs.read_short_entry(entry)?;
        if on_disk.is_directory() {
            return Err(Error::IsADirectory);
        }
        let first_cluster = on_disk.first_cluster;
        if first_cluster != 0 && !fs.volume.is_data_cluster(first_cluster) {
            return Err(Error::InvalidCluster);
        }

        Ok(Self {
            fs,
            location,
            first_cluster,
            size: on_disk.size,
            pos: 0,
            cursor: None,
            dirty: false,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.pos
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    fn cluster_size(&self) -> u32 {
        self.fs.volume.cluster_size()
    }

    /// Lire depuis la position courante. Rend moins que demandé seulement
    /// en fin de fichier.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let remaining = self.size.saturating_sub(self.pos) as usize;
        let len = buffer.len().min(remaining);
        let cluster_size = self.cluster_size();

        let mut done = 0;
        while done < len {
            if self.first_cluster == 0 {
                return Err(Error::CorruptChain);
            }
            let cluster = self
                .fs
                .seek_cluster(self.first_cluster, self.pos / cluster_size, &mut self.cursor)?
                // chaîne plus courte que la taille annoncée
                .ok_or(Error::CorruptChain)?;

            let within = self.pos % cluster_size;
            let chunk = ((cluster_size - within) as usize).min(len - done);
            let base = self.fs.volume.first_sector_of_cluster(cluster);
            self.fs.cache.read_bytes(base, within, &mut buffer[done..done + chunk])?;

            done += chunk;
            self.pos += chunk as u32;
        }

        Ok(done)
    }

    /// Écrire à la position courante. Si le volume se remplit en cours de
    /// route, rend le nombre d'octets effectivement écrits ; si aucun octet
    /// n'a pu être écrit, rend `Err(NoSpace)`.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        // taille de fichier sur 32 bits
        let room = (u32::MAX - self.pos) as usize;
        let len = buffer.len().min(room);
        if len == 0 && !buffer.is_empty() {
            return Err(Error::NoSpace);
        }
        let cluster_size = self.cluster_size();

        let mut done = 0;
        while done < len {
            let cluster = match self.cluster_for_write(self.pos / cluster_size) {
                Ok(cluster) => cluster,
                Err(Error::NoSpace) if done > 0 => break,
                Err(e) => return Err(e),
            };

            let within = self.pos % cluster_size;
            let chunk = ((cluster_size - within) as usize).min(len - done);
            let base = self.fs.volume.first_sector_of_cluster(cluster);
            self.fs.cache.write_bytes(base, within, &buffer[done..done + chunk])?;

            done += chunk;
            self.pos += chunk as u32;
            self.size = self.size.max(self.pos);
            self.dirty = true;
        }

        Ok(done)
    }

    /// Cluster de rang `index`, en allongeant la chaîne si besoin
    fn cluster_for_write(&mut self, index: u32) -> Result<u32> {
        if self.first_cluster == 0 {
            self.first_cluster = self.fs.fat().allocate_cluster(None)?;
            self.cursor = None;
            self.dirty = true;
        }

        loop {
            if let Some(cluster) = self.fs.seek_cluster(self.first_cluster, index, &mut self.cursor)? {
                return Ok(cluster);
            }
            let last = self.cursor.map_or(self.first_cluster, |(_, cluster)| cluster);
            self.fs.fat().allocate_cluster(Some(last))?;
        }
    }

    /// Déplacer la position. Aller au-delà de la fin est permis ; la chaîne
    /// est reparcourue depuis le début au prochain accès.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u32> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta as i64,
            SeekFrom::End(delta) => self.size as i64 + delta as i64,
        };
        if target < 0 || target > u32::MAX as i64 {
            return Err(Error::InvalidSeek);
        }

        self.pos = target as u32;
        self.cursor = None;
        Ok(self.pos)
    }

    /// Changer la taille du fichier. La fin de chaîne est libérée quand le
    /// fichier raccourcit ; les octets ajoutés ne sont pas initialisés.
    pub fn resize(&mut self, len: u32) -> Result<()> {
        let clusters = len.div_ceil(self.cluster_size());

        if clusters == 0 {
            if self.first_cluster != 0 {
                self.fs.fat().free_chain(self.first_cluster)?;
                self.first_cluster = 0;
            }
        } else {
            let last = self.cluster_for_write(clusters - 1)?;
            self.fs.fat().truncate_after(last)?;
        }

        self.size = len;
        self.cursor = None;
        self.dirty = true;
        Ok(())
    }

    /// Réécrire l'entrée de répertoire si besoin puis vider le tampon
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            let EntryLocation { sector, offset, .. } = self.location;
            let mut raw = [0u8; ENTRY_SIZE];
            self.fs.cache.read(sector, offset, &mut raw)?;

            let now = self.fs.now();
            let mut entry = ShortEntry::parse(&raw);
            entry.size = self.size;
            entry.first_cluster = self.first_cluster;
            entry.modified = now;
            entry.accessed = now.fat_date();
            entry.attributes |= Attributes::ARCHIVE;
            entry.encode(&mut raw);

            self.fs.cache.write(sector, offset, &raw)?;
            self.dirty = false;
        }
        self.fs.sync()
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}
