//! Options de montage et de la carte

use crate::PartitionSelector;

/// Politique du tampon de secteur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Un seul secteur modifié gardé en mémoire jusqu'au prochain `sync`
    /// ou jusqu'à ce que le tampon serve pour un autre secteur.
    WriteBack,
    /// Chaque écriture part immédiatement sur le support.
    WriteThrough,
}

#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
    pub partition: PartitionSelector,
    pub cache_mode: CacheMode,
    /// Recompter les clusters libres au montage au lieu de faire confiance
    /// au compteur FSInfo.
    pub rescan_free_space: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            partition: PartitionSelector::Auto,
            cache_mode: CacheMode::WriteBack,
            rescan_free_space: false,
        }
    }
}

impl MountOptions {
    pub const fn with_partition(mut self, partition: PartitionSelector) -> Self {
        self.partition = partition;
        self
    }

    pub const fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub const fn with_rescan(mut self, rescan: bool) -> Self {
        self.rescan_free_space = rescan;
        self
    }
}

/// Bornes des boucles d'attente du pilote SD
#[derive(Debug, Clone, Copy)]
pub struct CardConfig {
    /// Vérifier le CRC16 des données lues et activer le CRC côté carte (CMD59)
    pub crc: bool,
    /// Nombre d'envois de CMD0 avant d'abandonner
    pub command_retries: u16,
    /// Octets lus au plus en attente d'une réponse R1
    pub response_polls: u8,
    /// Budget d'initialisation (ACMD41 / CMD1), par pas de 1 ms
    pub init_timeout_ms: u32,
    /// Octets lus au plus en attente du jeton de début de données
    pub token_polls: u32,
    /// Octets lus au plus pendant que la carte est occupée après une écriture
    pub busy_polls: u32,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            crc: true,
            command_retries: 0x1ff,
            response_polls: 10,
            init_timeout_ms: 500,
            token_polls: 0xffff,
            busy_polls: 0x3ffff,
        }
    }
}
