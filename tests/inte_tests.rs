// Tests d'intégration : montage, fichiers, dossiers sur des images en mémoire
mod common;

use std::collections::HashSet;

use common::Geometry;
use proptest::prelude::*;
use sdfat::{
    CacheMode, DateTime, Error, FatEntry, FatType, FileSystem, MemoryDevice, MountOptions,
    PartitionSelector, SeekFrom,
};

fn mount(g: &Geometry) -> FileSystem<MemoryDevice> {
    FileSystem::mount(common::device(g), MountOptions::default()).unwrap()
}

fn write_file(fs: &mut FileSystem<MemoryDevice>, name: &str, data: &[u8]) {
    let entry = fs.root_dir().create_file(name).unwrap();
    let mut file = fs.open_file(&entry).unwrap();
    assert_eq!(file.write(data).unwrap(), data.len());
    file.close().unwrap();
}

fn read_file(fs: &mut FileSystem<MemoryDevice>, path: &str) -> Vec<u8> {
    let entry = fs.lookup(path).unwrap().unwrap();
    let mut file = fs.open_file(&entry).unwrap();
    let mut data = vec![0u8; entry.size() as usize + 16];
    let n = file.read(&mut data).unwrap();
    data.truncate(n);
    data
}

fn root_names(fs: &mut FileSystem<MemoryDevice>) -> Vec<String> {
    fs.root_dir()
        .list()
        .unwrap()
        .into_iter()
        .map(|e| e.name().to_string())
        .collect()
}

#[test]
fn test_mount_each_width() {
    let fs = mount(&Geometry::small());
    assert_eq!(fs.volume().fat_type, FatType::Fat12);

    let fs = mount(&Geometry::fat16());
    assert_eq!(fs.volume().fat_type, FatType::Fat16);
    assert_eq!(fs.volume().cluster_count, Geometry::fat16().cluster_count());

    let fs = mount(&Geometry::fat32());
    assert_eq!(fs.volume().fat_type, FatType::Fat32);
    assert_eq!(fs.partition().start_sector, 0);
}

#[test]
fn test_invalid_filesystem() {
    let device = MemoryDevice::new(1024, 512);
    let fs = FileSystem::mount(device, MountOptions::default());
    assert_eq!(fs.err(), Some(Error::InvalidBootSector));
}

#[test]
fn test_sector_size_mismatch() {
    let image = common::format(&Geometry::small());
    let device = MemoryDevice::from_image(image, 1024);
    let fs = FileSystem::mount(device, MountOptions::default().with_partition(PartitionSelector::Whole));
    assert_eq!(fs.err(), Some(Error::UnsupportedSectorSize));
}

#[test]
fn test_width_thresholds() {
    for (clusters, expected) in [(4084, FatType::Fat12), (4085, FatType::Fat16), (4086, FatType::Fat16)] {
        let mut g = Geometry {
            sectors_per_cluster: 1,
            reserved: 1,
            fats: 1,
            root_entries: 16,
            sectors_per_fat: 16,
            total_sectors: 0,
            fat32: false,
        };
        g.total_sectors = g.data_start() + clusters;
        assert_eq!(g.cluster_count(), clusters);

        let fs = mount(&g);
        assert_eq!(fs.volume().fat_type, expected, "{} clusters", clusters);
    }
}

#[test]
fn test_report_scenario() {
    let g = Geometry::small();
    let image = common::with_mbr(common::format(&g), 63, 0x06);
    let mut fs = FileSystem::mount(MemoryDevice::from_image(image, 512), MountOptions::default()).unwrap();
    assert_eq!(fs.partition().start_sector, 63);
    // la largeur vient du nombre de clusters, pas du type de partition
    assert_eq!(fs.volume().fat_type, FatType::Fat12);
    assert_eq!(fs.volume().cluster_size(), 2048);

    let data = common::pattern(5000, 7);
    let entry = fs.root_dir().create_file("report.txt").unwrap();
    let slot = entry.slot_index().unwrap();
    let mut file = fs.open_file(&entry).unwrap();
    assert_eq!(file.write(&data).unwrap(), 5000);
    let first = file.first_cluster();
    file.close().unwrap();

    assert_eq!(fs.fat().cluster_chain(first).unwrap().len(), 3);
    assert_eq!(read_file(&mut fs, "/report.txt"), data);

    let entry = fs.lookup("/report.txt").unwrap().unwrap();
    assert_eq!(entry.size(), 5000);
    fs.root_dir().delete(&entry).unwrap();
    assert!(!root_names(&mut fs).iter().any(|n| n == "report.txt"));
    assert_eq!(fs.fat().entry(first).unwrap(), FatEntry::Free);

    let other = fs.root_dir().create_file("summary.txt").unwrap();
    assert_eq!(other.slot_index(), Some(slot));
}

#[test]
fn test_delete_with_entry_from_create() {
    let mut fs = mount(&Geometry::small());
    let free = fs.free_clusters().unwrap();

    // l'entrée rendue par create_file n'a pas encore de cluster
    let entry = fs.root_dir().create_file("report.txt").unwrap();
    assert_eq!(entry.first_cluster(), 0);
    let mut file = fs.open_file(&entry).unwrap();
    assert_eq!(file.write(&common::pattern(5000, 1)).unwrap(), 5000);
    let first = file.first_cluster();
    file.close().unwrap();
    assert_eq!(fs.free_clusters().unwrap(), free - 3);

    fs.root_dir().delete(&entry).unwrap();
    assert_eq!(fs.fat().entry(first).unwrap(), FatEntry::Free);
    assert_eq!(fs.free_clusters().unwrap(), free);
    assert_eq!(fs.rescan_free_clusters().unwrap(), free);
}

#[test]
fn test_reopen_with_entry_from_create() {
    let mut fs = mount(&Geometry::small());
    let entry = fs.root_dir().create_file("log.txt").unwrap();

    let mut file = fs.open_file(&entry).unwrap();
    assert_eq!(file.write(b"first line\n").unwrap(), 11);
    let first = file.first_cluster();
    file.close().unwrap();
    let free = fs.free_clusters().unwrap();

    // même entrée : taille et chaîne sont relues sur le disque
    let mut file = fs.open_file(&entry).unwrap();
    assert_eq!((file.size(), file.first_cluster()), (11, first));
    file.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(file.write(b"second\n").unwrap(), 7);
    file.close().unwrap();

    assert_eq!(fs.free_clusters().unwrap(), free);
    assert_eq!(read_file(&mut fs, "/log.txt"), b"first line\nsecond\n");
}

#[test]
fn test_stale_entry_after_delete() {
    let mut fs = mount(&Geometry::small());
    let entry = fs.root_dir().create_file("gone.txt").unwrap();
    fs.delete(&entry).unwrap();
    assert_eq!(fs.open_file(&entry).err(), Some(Error::NotFound));
    assert_eq!(fs.delete(&entry).err(), Some(Error::NotFound));
}

#[test]
fn test_round_trip_survives_remount() {
    for g in [Geometry::small(), Geometry::fat16(), Geometry::fat32()] {
        let mut fs = mount(&g);
        let data = common::pattern(10_000, 3);
        write_file(&mut fs, "Round trip data.bin", &data);
        let device = fs.unmount().unwrap();

        let mut fs = FileSystem::mount(device, MountOptions::default()).unwrap();
        assert_eq!(read_file(&mut fs, "/round trip DATA.bin"), data);
    }
}

#[test]
fn test_chain_has_no_duplicates() {
    let mut fs = mount(&Geometry::fat16());
    write_file(&mut fs, "a.bin", &common::pattern(3000, 1));
    write_file(&mut fs, "b.bin", &common::pattern(1, 2));
    // entrelacer deux fichiers
    let entry = fs.lookup("/a.bin").unwrap().unwrap();
    let mut file = fs.open_file(&entry).unwrap();
    file.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(file.write(&common::pattern(2000, 3)).unwrap(), 2000);
    file.close().unwrap();

    let entry = fs.lookup("/a.bin").unwrap().unwrap();
    let chain = fs.fat().cluster_chain(entry.first_cluster()).unwrap();
    assert_eq!(chain.len() as u32, entry.size().div_ceil(512));

    let unique: HashSet<u32> = chain.iter().copied().collect();
    assert_eq!(unique.len(), chain.len());
    for pair in chain.windows(2) {
        assert_eq!(fs.fat().entry(pair[0]).unwrap(), FatEntry::Next(pair[1]));
    }
    assert_eq!(fs.fat().entry(*chain.last().unwrap()).unwrap(), FatEntry::EndOfChain);
}

#[test]
fn test_long_name_checksum_fallback() {
    let g = Geometry::fat16();
    let mut fs = mount(&g);
    write_file(&mut fs, "a long file name.txt", b"hello");
    assert_eq!(root_names(&mut fs), vec!["a long file name.txt"]);
    let mut device = fs.unmount().unwrap();

    // deux fragments puis l'entrée courte ; casser la somme du fragment 1
    let root = (g.reserved as usize + g.fats as usize * g.sectors_per_fat as usize) * 512;
    device.as_bytes_mut()[root + 32 + 13] ^= 0xFF;

    let mut fs = FileSystem::mount(device, MountOptions::default()).unwrap();
    assert_eq!(root_names(&mut fs), vec!["ALONGF~1.TXT"]);
    assert_eq!(read_file(&mut fs, "/alongf~1.txt"), b"hello");
}

#[test]
fn test_short_name_generation() {
    let mut fs = mount(&Geometry::small());
    let a = fs.root_dir().create_file("My Document.docx").unwrap();
    let b = fs.root_dir().create_file("My Document 2.docx").unwrap();
    assert_eq!(a.short_name(), "MYDOCU~1.DOC");
    assert_eq!(b.short_name(), "MYDOCU~2.DOC");

    // le nom court répond aussi
    let found = fs.lookup("/mydocu~2.doc").unwrap().unwrap();
    assert_eq!(found.name(), "My Document 2.docx");

    // 8.3 en minuscules : pas de nom long, casse conservée
    let c = fs.root_dir().create_file("notes.txt").unwrap();
    assert_eq!(c.name(), "notes.txt");
    assert_eq!(c.short_name(), "NOTES.TXT");
    assert_eq!(c.slot_index(), Some(b.slot_index().unwrap() + 1));
}

#[test]
fn test_create_errors() {
    let mut fs = mount(&Geometry::small());
    fs.root_dir().create_file("Data.csv").unwrap();
    assert_eq!(fs.root_dir().create_file("DATA.CSV").err(), Some(Error::AlreadyExists));
    assert_eq!(fs.root_dir().create_dir("data.csv").err(), Some(Error::AlreadyExists));
    assert_eq!(fs.root_dir().create_file("bad|name").err(), Some(Error::InvalidName));
    assert_eq!(fs.root_dir().create_file("..").err(), Some(Error::InvalidName));
}

#[test]
fn test_nested_lookup() {
    let mut fs = mount(&Geometry::fat32());
    let a = fs.root_dir().create_dir("alpha").unwrap();
    let b = fs.open_dir(&a).unwrap().create_dir("Beta Directory").unwrap();
    let c = fs.open_dir(&b).unwrap().create_file("c.txt").unwrap();
    assert!(!c.is_dir());

    let found = fs.lookup("/alpha/beta directory/C.TXT").unwrap().unwrap();
    assert_eq!(found.first_cluster(), 0);
    assert!(fs.lookup("/alpha/missing").unwrap().is_none());
    assert_eq!(fs.lookup("/alpha/Beta Directory/c.txt/x").err(), Some(Error::NotADirectory));

    // ".." d'un dossier de la racine vaut 0
    let dotdot = fs.lookup("/alpha/..").unwrap().unwrap();
    assert_eq!(dotdot.first_cluster(), 0);
    let names: Vec<String> = fs.open_dir(&dotdot).unwrap().list().unwrap()
        .into_iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, vec!["alpha"]);

    assert_eq!(fs.open_file(&a).err(), Some(Error::IsADirectory));
    assert_eq!(fs.open_dir(&c).err(), Some(Error::NotADirectory));
}

#[test]
fn test_directory_grows() {
    let mut fs = mount(&Geometry::fat16());
    let dir = fs.root_dir().create_dir("many").unwrap();

    let mut dir_handle = fs.open_dir(&dir).unwrap();
    for i in 0..40 {
        dir_handle.create_file(&format!("F{}.TXT", i)).unwrap();
    }
    assert_eq!(dir_handle.list().unwrap().len(), 42);

    // 16 entrées par cluster de 512 octets
    let chain = fs.fat().cluster_chain(dir.first_cluster()).unwrap();
    assert_eq!(chain.len(), 3);
    assert!(fs.lookup("/many/f39.txt").unwrap().is_some());
}

#[test]
fn test_fixed_root_full() {
    let mut fs = mount(&Geometry::tiny_root());
    for i in 0..16 {
        fs.root_dir().create_file(&format!("F{}", i)).unwrap();
    }
    assert_eq!(fs.root_dir().create_file("ONEMORE").err(), Some(Error::DirectoryFull));

    // une suppression libère un emplacement
    let entry = fs.lookup("/F3").unwrap().unwrap();
    fs.delete(&entry).unwrap();
    let again = fs.root_dir().create_file("ONEMORE").unwrap();
    assert_eq!(again.slot_index(), Some(3));
}

#[test]
fn test_non_empty_directory_refused() {
    let mut fs = mount(&Geometry::small());
    let dir = fs.root_dir().create_dir("logs").unwrap();
    let free = fs.free_clusters().unwrap();
    fs.open_dir(&dir).unwrap().create_file("today.log").unwrap();

    assert_eq!(fs.delete(&dir).err(), Some(Error::DirectoryNotEmpty));

    let child = fs.lookup("/logs/today.log").unwrap().unwrap();
    fs.delete(&child).unwrap();
    fs.delete(&dir).unwrap();
    assert!(fs.lookup("/logs").unwrap().is_none());
    assert_eq!(fs.free_clusters().unwrap(), free + 1);
}

#[test]
fn test_fs_info_updated() {
    let g = Geometry::fat32();
    let mut fs = mount(&g);
    assert_eq!(fs.volume().free_clusters(), Some(g.cluster_count() - 1));
    assert_eq!(fs.volume().next_free_hint(), 3);

    write_file(&mut fs, "three.bin", &common::pattern(1500, 0));
    let device = fs.unmount().unwrap();

    let info = &device.as_bytes()[512..1024];
    assert_eq!(info[488..492], (g.cluster_count() - 4).to_le_bytes());
    assert_eq!(info[492..496], 6u32.to_le_bytes());
}

#[test]
fn test_rescan_on_mount() {
    let g = Geometry::fat32();
    let mut image = common::format(&g);
    image[512 + 488..512 + 492].copy_from_slice(&5u32.to_le_bytes());

    let fs = FileSystem::mount(MemoryDevice::from_image(image.clone(), 512), MountOptions::default()).unwrap();
    assert_eq!(fs.volume().free_clusters(), Some(5));

    let options = MountOptions::default().with_rescan(true);
    let mut fs = FileSystem::mount(MemoryDevice::from_image(image, 512), options).unwrap();
    assert_eq!(fs.free_clusters().unwrap(), g.cluster_count() - 1);
    assert_eq!(fs.free_space().unwrap(), (g.cluster_count() as u64 - 1) * 512);
    assert_eq!(fs.size(), g.cluster_count() as u64 * 512);
}

#[test]
fn test_write_until_full() {
    let g = Geometry::tiny_root();
    let mut fs = mount(&g);
    let entry = fs.root_dir().create_file("big").unwrap();
    let mut file = fs.open_file(&entry).unwrap();

    let capacity = g.cluster_count() as usize * 512;
    assert_eq!(file.write(&vec![0xAB; capacity + 5000]).unwrap(), capacity);
    assert_eq!(file.write(b"more"), Err(Error::NoSpace));
    file.close().unwrap();

    assert_eq!(fs.free_clusters().unwrap(), 0);
    assert_eq!(fs.lookup("/big").unwrap().unwrap().size() as usize, capacity);
}

#[test]
fn test_time_source() {
    let mut fs = mount(&Geometry::small());
    fs.set_time_source(|| DateTime::new(2024, 6, 1, 12, 30, 10));

    let entry = fs.root_dir().create_file("stamp.txt").unwrap();
    assert_eq!(entry.created(), DateTime::new(2024, 6, 1, 12, 30, 10));

    fs.set_time_source(|| DateTime::new(2025, 1, 2, 3, 4, 6));
    let mut file = fs.open_file(&entry).unwrap();
    assert_eq!(file.write(b"x").unwrap(), 1);
    file.close().unwrap();

    let entry = fs.lookup("/stamp.txt").unwrap().unwrap();
    assert_eq!(entry.created().year, 2024);
    assert_eq!(entry.modified(), DateTime::new(2025, 1, 2, 3, 4, 6));
}

#[test]
fn test_write_through_mode() {
    let options = MountOptions::default().with_cache_mode(CacheMode::WriteThrough);
    let mut fs = FileSystem::mount(common::device(&Geometry::small()), options).unwrap();
    fs.root_dir().create_file("now.txt").unwrap();

    // sans sync, l'entrée est déjà sur le support
    let root = 38 - 32;
    assert_eq!(&fs.device().as_bytes()[root * 512..root * 512 + 11], b"NOW     TXT");
}

const NAMES: [&str; 8] = [
    "a.txt",
    "B.TXT",
    "longer name one.dat",
    "Another Long Name.txt",
    "x",
    "Zeta.Bin",
    "with.two.dots",
    "UPPER.C",
];

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn prop_round_trip(len in 0usize..9000, seed: u8, offset in 0u32..3000) {
        let mut fs = mount(&Geometry::small());
        let data = common::pattern(len, seed);
        write_file(&mut fs, "prop.bin", &data);
        prop_assert_eq!(read_file(&mut fs, "/prop.bin"), data.clone());

        let entry = fs.lookup("/prop.bin").unwrap().unwrap();
        let mut file = fs.open_file(&entry).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = vec![0u8; 100];
        let n = file.read(&mut buf).unwrap();
        let start = (offset as usize).min(len);
        let expected = &data[start..(start + 100).min(len)];
        prop_assert_eq!(&buf[..n], expected);
    }

    #[test]
    fn prop_create_delete(ops in proptest::collection::vec((any::<bool>(), 0usize..NAMES.len()), 1..30)) {
        let mut fs = mount(&Geometry::small());
        let mut model = HashSet::new();

        for (create, i) in ops {
            let name = NAMES[i];
            if create {
                let result = fs.root_dir().create_file(name);
                if model.insert(name) {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert_eq!(result.err(), Some(Error::AlreadyExists));
                }
            } else {
                let found = fs.lookup(name).unwrap();
                prop_assert_eq!(found.is_some(), model.remove(name));
                if let Some(entry) = found {
                    fs.delete(&entry).unwrap();
                }
            }
        }

        let listed: HashSet<String> = root_names(&mut fs).into_iter().collect();
        let expected: HashSet<String> = model.iter().map(|n| n.to_string()).collect();
        prop_assert_eq!(listed, expected);
    }
}
