//! Volume FAT monté : montage, navigation, suppression, synchronisation

use alloc::boxed::Box;
use alloc::vec;

use crate::dir::{DirStart, MAX_DIR_ENTRIES};
use crate::directory::{Attributes, ShortEntry, DELETED, ENTRY_SIZE};
use crate::partition::PartitionSelector;
use crate::volume::FsInfo;
use crate::{
    BlockDevice, BootSector, DateTime, Dir, DirEntry, Error, FatTable, File, MountOptions,
    Partition, Result, SectorCache, TimeSource, Volume,
};

/// Position dans une chaîne : (rang du cluster, numéro du cluster)
pub(crate) type ClusterCursor = Option<(u32, u32)>;

pub struct FileSystem<D: BlockDevice> {
    pub(crate) cache: SectorCache<D>,
    pub(crate) volume: Volume,
    partition: Partition,
    time: Option<Box<dyn TimeSource>>,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Monter le système de fichiers de la partition choisie
    pub fn mount(mut device: D, options: MountOptions) -> Result<Self> {
        let partition = Partition::open(&mut device, options.partition)?;

        let (partition, bs) = match read_boot_sector(&mut device, &partition) {
            Ok(bs) => (partition, bs),
            // l'entrée trouvée ne contient pas de FAT : essayer le support entier
            Err(e) if options.partition == PartitionSelector::Auto && partition.start_sector != 0 => {
                log::debug!("partition {:?} illisible ({}), essai du support entier", partition, e);
                let whole = Partition::whole_device(&device);
                let bs = read_boot_sector(&mut device, &whole)?;
                (whole, bs)
            }
            Err(e) => return Err(e),
        };

        let volume = Volume::from_boot_sector(&bs, partition.start_sector);
        log::debug!(
            "montage {:?}: {} clusters de {} octets, FAT à {} ({} x {}), données à {}",
            volume.fat_type,
            volume.cluster_count,
            volume.cluster_size(),
            volume.fat_start,
            volume.fat_count,
            volume.sectors_per_fat,
            volume.data_start
        );

        let mut fs = Self {
            cache: SectorCache::new(device, options.cache_mode),
            volume,
            partition,
            time: None,
        };

        if let Some(sector) = fs.volume.fs_info_sector {
            let mut data = vec![0u8; fs.cache.sector_size()];
            fs.cache.read(sector, 0, &mut data)?;
            match FsInfo::parse(&data) {
                Some(info) => fs.volume.apply_fs_info(info),
                None => log::debug!("secteur FSInfo {} invalide, ignoré", sector),
            }
        }

        if options.rescan_free_space {
            fs.rescan_free_clusters()?;
        }

        Ok(fs)
    }

    /// Horloge utilisée pour les dates de création et de modification
    pub fn set_time_source<T: TimeSource + 'static>(&mut self, source: T) {
        self.time = Some(Box::new(source));
    }

    pub(crate) fn now(&self) -> DateTime {
        self.time.as_ref().map_or(DateTime::EPOCH, |t| t.now())
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn device(&self) -> &D {
        self.cache.device()
    }

    pub fn fat(&mut self) -> FatTable<'_, D> {
        FatTable::new(&mut self.cache, &mut self.volume)
    }

    /// Entrée fictive représentant la racine
    pub fn root_entry(&self) -> DirEntry {
        DirEntry::root(&self.volume)
    }

    pub fn root_dir(&mut self) -> Dir<'_, D> {
        let start = DirStart::from(self.volume.root);
        Dir::new(self, start)
    }

    pub fn open_dir(&mut self, entry: &DirEntry) -> Result<Dir<'_, D>> {
        if !entry.is_dir() {
            return Err(Error::NotADirectory);
        }
        let start = self.dir_start(entry.first_cluster())?;
        Ok(Dir::new(self, start))
    }

    pub fn open_file(&mut self, entry: &DirEntry) -> Result<File<'_, D>> {
        if entry.is_dir() {
            return Err(Error::IsADirectory);
        }
        File::open(self, entry)
    }

    /// Résoudre un chemin absolu séparé par '/'. `Ok(None)` si un élément manque.
    pub fn lookup(&mut self, path: &str) -> Result<Option<DirEntry>> {
        let mut current = self.root_entry();

        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if !current.is_dir() {
                return Err(Error::NotADirectory);
            }
            let mut dir = self.open_dir(&current)?;
            match dir.find(component)? {
                Some(entry) => current = entry,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Supprimer un fichier ou un dossier vide. La chaîne est libérée avant
    /// que les emplacements ne soient marqués supprimés.
    pub fn delete(&mut self, entry: &DirEntry) -> Result<()> {
        let location = entry.location.ok_or(Error::InvalidName)?;
        if entry.is_dot_entry() {
            return Err(Error::InvalidName);
        }

        // l'entrée passée peut dater d'avant une écriture : on relit le disque
        let on_disk = self.read_short_entry(entry)?;
        let first_cluster = on_disk.first_cluster;

        if on_disk.is_directory() && first_cluster != 0 && !self.is_empty_dir(first_cluster)? {
            return Err(Error::DirectoryNotEmpty);
        }

        if self.volume.is_data_cluster(first_cluster) {
            self.fat().free_chain(first_cluster)?;
        }

        let mut cursor = None;
        for index in location.first_slot..=location.slot {
            if let Some((sector, offset)) = self.slot_position(location.dir, index, &mut cursor)? {
                self.cache.write(sector, offset, &[DELETED])?;
            }
        }
        log::debug!("supprimé: {}", entry.name());
        Ok(())
    }

    /// Entrée courte telle qu'elle est sur le disque. `NotFound` si
    /// l'emplacement a été réutilisé depuis.
    pub(crate) fn read_short_entry(&mut self, entry: &DirEntry) -> Result<ShortEntry> {
        let location = entry.location.ok_or(Error::InvalidName)?;
        let mut raw = [0u8; ENTRY_SIZE];
        self.cache.read(location.sector, location.offset, &mut raw)?;
        if raw[0..11] != entry.short_name {
            return Err(Error::NotFound);
        }
        Ok(ShortEntry::parse(&raw))
    }

    fn is_empty_dir(&mut self, cluster: u32) -> Result<bool> {
        let start = self.dir_start(cluster)?;
        let mut dir = Dir::new(self, start);
        while let Some(child) = dir.read_next()? {
            if !child.is_dot_entry() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Nombre de clusters libres, compté au premier appel si inconnu
    pub fn free_clusters(&mut self) -> Result<u32> {
        match self.volume.free_clusters() {
            Some(free) => Ok(free),
            None => self.rescan_free_clusters(),
        }
    }

    pub fn rescan_free_clusters(&mut self) -> Result<u32> {
        self.fat().rescan_free_clusters()
    }

    /// Espace libre en octets
    pub fn free_space(&mut self) -> Result<u64> {
        Ok(self.free_clusters()? as u64 * self.volume.cluster_size() as u64)
    }

    /// Taille de la zone de données en octets
    pub fn size(&self) -> u64 {
        self.volume.size()
    }

    /// Réécrire FSInfo si besoin et vider le tampon
    pub fn sync(&mut self) -> Result<()> {
        if self.volume.fs_info_dirty {
            if let Some(sector) = self.volume.fs_info_sector {
                let mut data = vec![0u8; self.cache.sector_size()];
                self.cache.read(sector, 0, &mut data)?;
                if FsInfo::parse(&data).is_some() {
                    let info = FsInfo {
                        free_count: self.volume.free_clusters,
                        next_free: Some(self.volume.next_free),
                    };
                    info.encode_counters(&mut data);
                    self.cache.write(sector, 0, &data)?;
                }
            }
            self.volume.fs_info_dirty = false;
        }
        self.cache.sync()
    }

    /// Synchroniser puis rendre le support
    pub fn unmount(mut self) -> Result<D> {
        self.sync()?;
        Ok(self.cache.into_inner())
    }

    /// Répertoire désigné par un numéro de cluster d'entrée (0 = racine)
    pub(crate) fn dir_start(&self, cluster: u32) -> Result<DirStart> {
        if cluster == 0 {
            return Ok(DirStart::from(self.volume.root));
        }
        if !self.volume.is_data_cluster(cluster) {
            return Err(Error::InvalidCluster);
        }
        Ok(DirStart::Chain(cluster))
    }

    /// Avancer jusqu'au cluster de rang `target` d'une chaîne. `None` si la
    /// chaîne est plus courte ; le curseur reste alors sur son dernier cluster.
    pub(crate) fn seek_cluster(
        &mut self,
        first: u32,
        target: u32,
        cursor: &mut ClusterCursor,
    ) -> Result<Option<u32>> {
        if !self.volume.is_data_cluster(first) {
            return Err(Error::InvalidCluster);
        }

        let (mut index, mut cluster) = match *cursor {
            Some((index, cluster)) if index <= target => (index, cluster),
            _ => (0, first),
        };

        while index < target {
            match self.fat().next_cluster(cluster)? {
                Some(next) => {
                    cluster = next;
                    index += 1;
                }
                None => {
                    *cursor = Some((index, cluster));
                    return Ok(None);
                }
            }
        }

        *cursor = Some((index, cluster));
        Ok(Some(cluster))
    }

    /// Secteur et décalage de l'emplacement `index` d'un répertoire
    pub(crate) fn slot_position(
        &mut self,
        dir: DirStart,
        index: u32,
        cursor: &mut ClusterCursor,
    ) -> Result<Option<(u32, usize)>> {
        let bytes_per_sector = self.volume.bytes_per_sector;
        let byte = index * ENTRY_SIZE as u32;

        match dir {
            DirStart::Fixed { first_sector, entries } => {
                if index >= entries as u32 {
                    return Ok(None);
                }
                Ok(Some((first_sector + byte / bytes_per_sector, (byte % bytes_per_sector) as usize)))
            }
            DirStart::Chain(first) => {
                if index >= MAX_DIR_ENTRIES {
                    return Ok(None);
                }
                let cluster_size = self.volume.cluster_size();
                let Some(cluster) = self.seek_cluster(first, byte / cluster_size, cursor)? else {
                    return Ok(None);
                };
                let within = byte % cluster_size;
                let sector = self.volume.first_sector_of_cluster(cluster) + within / bytes_per_sector;
                Ok(Some((sector, (within % bytes_per_sector) as usize)))
            }
        }
    }

    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<()> {
        let first = self.volume.first_sector_of_cluster(cluster);
        for sector in first..first + self.volume.sectors_per_cluster {
            self.cache.fill(sector, 0)?;
        }
        Ok(())
    }

    /// Cluster d'un nouveau dossier, avec ses entrées "." et ".."
    pub(crate) fn new_dir_cluster(&mut self, parent: u32, now: DateTime) -> Result<u32> {
        let cluster = self.fat().allocate_cluster(None)?;
        self.zero_cluster(cluster)?;

        let mut raw = [0u8; 2 * ENTRY_SIZE];
        ShortEntry::new(*b".          ", Attributes::DIRECTORY, cluster, now)
            .encode(&mut raw[..ENTRY_SIZE]);
        ShortEntry::new(*b"..         ", Attributes::DIRECTORY, parent, now)
            .encode(&mut raw[ENTRY_SIZE..]);
        let sector = self.volume.first_sector_of_cluster(cluster);
        self.cache.write(sector, 0, &raw)?;
        Ok(cluster)
    }
}

fn read_boot_sector<D: BlockDevice>(device: &mut D, partition: &Partition) -> Result<BootSector> {
    let mut sector = vec![0u8; device.sector_size()];
    device.read_sector(partition.start_sector, &mut sector)?;

    let bs = BootSector::parse(&sector)?;
    bs.validate()?;
    if bs.bytes_per_sector as usize != device.sector_size() {
        return Err(Error::UnsupportedSectorSize);
    }

    let device_sectors = device.sector_count() as u64;
    if partition.start_sector as u64 + bs.total_sectors() as u64 > device_sectors
        || (partition.sector_count != 0 && bs.total_sectors() > partition.sector_count)
    {
        return Err(Error::InvalidPartition);
    }
    Ok(bs)
}
