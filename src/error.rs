use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Erreurs de transport (carte SD, image, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// Une boucle d'attente a épuisé son budget
    Timeout,
    /// CRC des données invalide
    Crc,
    /// Réponse R1 inattendue
    BadResponse(u8),
    /// Jeton d'erreur à la place du jeton de début de données
    DataToken(u8),
    /// Réponse de données refusée par la carte
    WriteRejected(u8),
    /// Secteur hors du périphérique
    OutOfRange,
    /// Erreur du support sous-jacent
    Transport,
    NotInitialized,
}

/// Les différentes erreurs possibles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Io(IoError),
    InvalidBootSector,
    UnsupportedSectorSize,
    InvalidPartition,
    InvalidCluster,
    CorruptChain,
    NotFound,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    AlreadyExists,
    InvalidName,
    InvalidSeek,
    NoSpace,
    DirectoryFull,
    BufferTooSmall,
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "délai dépassé"),
            Self::Crc => write!(f, "CRC invalide"),
            Self::BadResponse(r) => write!(f, "réponse inattendue 0x{:02x}", r),
            Self::DataToken(t) => write!(f, "jeton d'erreur 0x{:02x}", t),
            Self::WriteRejected(r) => write!(f, "écriture refusée 0x{:02x}", r),
            Self::OutOfRange => write!(f, "secteur hors limites"),
            Self::Transport => write!(f, "erreur du support"),
            Self::NotInitialized => write!(f, "carte non initialisée"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Erreur d'entrée/sortie: {}", e),
            Self::InvalidBootSector => write!(f, "Boot sector invalide"),
            Self::UnsupportedSectorSize => write!(f, "Taille de secteur non supportée"),
            Self::InvalidPartition => write!(f, "Partition invalide"),
            Self::InvalidCluster => write!(f, "Numéro de cluster invalide"),
            Self::CorruptChain => write!(f, "Chaîne de clusters corrompue"),
            Self::NotFound => write!(f, "Fichier ou dossier non trouvé"),
            Self::NotADirectory => write!(f, "Ce n'est pas un dossier"),
            Self::IsADirectory => write!(f, "C'est un dossier"),
            Self::DirectoryNotEmpty => write!(f, "Dossier non vide"),
            Self::AlreadyExists => write!(f, "Le nom existe déjà"),
            Self::InvalidName => write!(f, "Nom invalide"),
            Self::InvalidSeek => write!(f, "Position invalide"),
            Self::NoSpace => write!(f, "Plus de cluster libre"),
            Self::DirectoryFull => write!(f, "Dossier plein"),
            Self::BufferTooSmall => write!(f, "Buffer trop petit"),
        }
    }
}

impl core::error::Error for IoError {}

impl core::error::Error for Error {}
