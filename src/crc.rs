//! CRC du protocole SD : CRC7 pour les commandes, CRC16-CCITT pour les données

/// CRC7 (polynôme x^7 + x^3 + 1), non décalé
pub fn crc7(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        let mut b = byte;
        for _ in 0..8 {
            crc <<= 1;
            if (b ^ crc) & 0x80 != 0 {
                crc ^= 0x09;
            }
            b <<= 1;
        }
    }
    crc & 0x7f
}

/// CRC16-CCITT (polynôme 0x1021, valeur initiale 0)
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
