//! Décodage des registres CID et CSD de la carte

/// Informations lues dans les registres CID et CSD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    pub manufacturer: u8,
    pub oem: [u8; 2],
    pub product: [u8; 5],
    pub revision: u8,
    pub serial: u32,
    pub manufacturing_year: u16,
    pub manufacturing_month: u8,
    /// Capacité en octets
    pub capacity: u64,
    pub flag_copy: bool,
    pub flag_write_protect: bool,
    pub flag_write_protect_temp: bool,
    pub format: u8,
}

impl CardInfo {
    pub fn from_registers(cid: &[u8; 16], csd: &[u8; 16]) -> Self {
        Self {
            manufacturer: cid[0],
            oem: [cid[1], cid[2]],
            product: [cid[3], cid[4], cid[5], cid[6], cid[7]],
            revision: cid[8],
            serial: u32::from_be_bytes([cid[9], cid[10], cid[11], cid[12]]),
            manufacturing_year: 2000 + ((((cid[13] & 0x0f) as u16) << 4) | (cid[14] >> 4) as u16),
            manufacturing_month: cid[14] & 0x0f,
            capacity: csd_capacity(csd),
            flag_copy: csd[14] & 0x40 != 0,
            flag_write_protect: csd[14] & 0x20 != 0,
            flag_write_protect_temp: csd[14] & 0x10 != 0,
            format: (csd[14] >> 2) & 0x03,
        }
    }

    /// Nom du produit, si c'est de l'ASCII
    pub fn product_name(&self) -> &str {
        core::str::from_utf8(&self.product).unwrap_or("")
    }

    pub fn oem_name(&self) -> &str {
        core::str::from_utf8(&self.oem).unwrap_or("")
    }
}

/// Capacité en octets décrite par le CSD (structures 1.0 et 2.0)
pub fn csd_capacity(csd: &[u8; 16]) -> u64 {
    match csd[0] >> 6 {
        1 => {
            let c_size = (((csd[7] & 0x3f) as u64) << 16) | ((csd[8] as u64) << 8) | csd[9] as u64;
            (c_size + 1) * 512 * 1024
        }
        // CSD 1.0, et MMC
        _ => {
            let read_bl_len = (csd[5] & 0x0f) as u32;
            let c_size = (((csd[6] & 0x03) as u64) << 10) | ((csd[7] as u64) << 2) | (csd[8] >> 6) as u64;
            let c_size_mult = (((csd[9] & 0x03) as u32) << 1) | (csd[10] >> 7) as u32;
            (c_size + 1) << (c_size_mult + 2 + read_bl_len)
        }
    }
}
