// CLI pour manipuler une image de carte SD (MBR + FAT12/16/32)
use std::env;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use sdfat::{
    BlockDevice, DateTime, DirEntry, Error, FileSystem, IoError, MountOptions, Result,
};

/// Device basé sur un fichier image
struct FileDevice {
    file: File,
    sectors: u32,
}

impl FileDevice {
    const SECTOR_SIZE: usize = 512;

    fn open(path: &str) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let sectors = (file.metadata()?.len() / Self::SECTOR_SIZE as u64).min(u32::MAX as u64) as u32;
        Ok(Self { file, sectors })
    }

    fn seek_to(&mut self, sector: u32) -> Result<()> {
        if sector >= self.sectors {
            return Err(IoError::OutOfRange.into());
        }
        self.file
            .seek(SeekFrom::Start(sector as u64 * Self::SECTOR_SIZE as u64))
            .map_err(|_| IoError::Transport)?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8]) -> Result<()> {
        self.seek_to(sector)?;
        self.file.read_exact(buffer).map_err(|_| IoError::Transport)?;
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, buffer: &[u8]) -> Result<()> {
        self.seek_to(sector)?;
        self.file.write_all(buffer).map_err(|_| IoError::Transport)?;
        Ok(())
    }

    fn sector_size(&self) -> usize {
        Self::SECTOR_SIZE
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }
}

struct Logger;

static LOGGER: Logger = Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Niveau lu dans SDFAT_LOG (error, warn, info, debug, trace)
fn init_logging() {
    let level = env::var("SDFAT_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(log::LevelFilter::Warn);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Heure système convertie en date civile UTC
fn now() -> DateTime {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86400) as i64;
    let rem = secs % 86400;

    // jours depuis 1970 -> (année, mois, jour)
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };

    DateTime::new(
        year.clamp(1980, 2107) as u16,
        month as u8,
        day as u8,
        (rem / 3600) as u8,
        (rem % 3600 / 60) as u8,
        (rem % 60) as u8,
    )
}

fn print_help(program: &str) {
    println!("Carte SD / image FAT");
    println!();
    println!("Usage: {} <image> <commande> [args]", program);
    println!();
    println!("Commandes:");
    println!("  ls [chemin]               Liste les fichiers");
    println!("  cat <fichier>             Affiche un fichier");
    println!("  disk                      Taille et espace libre");
    println!("  touch <fichier>           Crée un fichier vide");
    println!("  mkdir <dossier>           Crée un dossier");
    println!("  rm <chemin>               Supprime un fichier ou un dossier vide");
    println!("  write <fichier> [offset]  Écrit l'entrée standard dans un fichier");
    println!();
    println!("Exemples:");
    println!("  {} sd.img ls", program);
    println!("  {} sd.img cat /logs/report.txt", program);
    println!("  echo hello | {} sd.img write /hello.txt 0", program);
}

/// ("/a/b", "c") pour "/a/b/c"
fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_end_matches('/');
    path.rsplit_once('/').unwrap_or(("", path))
}

fn find(fs: &mut FileSystem<FileDevice>, path: &str) -> Result<DirEntry> {
    fs.lookup(path)?.ok_or(Error::NotFound)
}

fn find_dir(fs: &mut FileSystem<FileDevice>, path: &str) -> Result<DirEntry> {
    let entry = find(fs, path)?;
    if !entry.is_dir() {
        return Err(Error::NotADirectory);
    }
    Ok(entry)
}

fn run(fs: &mut FileSystem<FileDevice>, cmd: &str, args: &[String]) -> Result<()> {
    let arg = |i: usize| args.get(i).map(|s| s.as_str());

    match cmd {
        "ls" => {
            let entry = find_dir(fs, arg(0).unwrap_or("/"))?;
            let entries = fs.open_dir(&entry)?.list()?;
            if entries.is_empty() {
                println!("(vide)");
            }
            for entry in entries {
                let type_str = if entry.is_dir() { "DIR " } else { "FILE" };
                println!(
                    "{} {:>10}  {}  {}",
                    type_str,
                    entry.size(),
                    entry.modified(),
                    entry.name()
                );
            }
        }

        "cat" => {
            let entry = find(fs, arg(0).ok_or(Error::NotFound)?)?;
            let mut file = fs.open_file(&entry)?;
            let mut buffer = [0u8; 512];
            let mut stdout = io::stdout();
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buffer[..n]).map_err(|_| IoError::Transport)?;
            }
        }

        "disk" => {
            let size = fs.size();
            let free = fs.free_space()?;
            let volume = fs.volume();
            println!("type:      {:?}", volume.fat_type);
            println!("cluster:   {} octets", volume.cluster_size());
            println!("partition: secteur {}", fs.partition().start_sector);
            println!("taille:    {} octets", size);
            println!("libre:     {} octets", free);
        }

        "touch" | "mkdir" => {
            let (parent, name) = split_path(arg(0).ok_or(Error::InvalidName)?);
            let entry = find_dir(fs, parent)?;
            let mut dir = fs.open_dir(&entry)?;
            if cmd == "touch" {
                dir.create_file(name)?;
            } else {
                dir.create_dir(name)?;
            }
        }

        "rm" => {
            let entry = find(fs, arg(0).ok_or(Error::NotFound)?)?;
            fs.delete(&entry)?;
        }

        "write" => {
            let entry = find(fs, arg(0).ok_or(Error::NotFound)?)?;
            let offset = arg(1).and_then(|o| o.parse().ok());

            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data).map_err(|_| IoError::Transport)?;

            let mut file = fs.open_file(&entry)?;
            match offset {
                Some(offset) => file.seek(sdfat::SeekFrom::Start(offset))?,
                None => file.seek(sdfat::SeekFrom::End(0))?,
            };
            let written = file.write(&data)?;
            file.close()?;
            if written < data.len() {
                eprintln!("disque plein: {} octets sur {} écrits", written, data.len());
            }
        }

        _ => {
            eprintln!("Commande inconnue: {}", cmd);
            process::exit(1);
        }
    }

    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help(&args[0]);
        return Ok(());
    }

    let image_path = &args[1];

    // Ouvrir l'image
    let device = match FileDevice::open(image_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Erreur: impossible d'ouvrir '{}': {}", image_path, e);
            process::exit(1);
        }
    };

    let mut fs = match FileSystem::mount(device, MountOptions::default()) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("Erreur: filesystem invalide: {}", e);
            process::exit(1);
        }
    };
    fs.set_time_source(now);

    // Commande par défaut = ls
    let cmd = args.get(2).map(|s| s.as_str()).unwrap_or("ls");
    let result = run(&mut fs, cmd, &args[3.min(args.len())..]);

    // toujours démonter pour écrire le tampon et FSInfo
    let unmounted = fs.unmount();
    if let Err(e) = result.and(unmounted.map(|_| ())) {
        eprintln!("Erreur: {}", e);
        return Err(Box::new(e));
    }

    Ok(())
}
