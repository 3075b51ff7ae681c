//! Pilote de carte SD/MMC en mode SPI
//!
//! Le protocole : CMD0 pour passer en mode SPI, CMD8 pour détecter une carte
//! SD v2, puis ACMD41 (ou CMD1 pour une MMC) jusqu'à ce que la carte sorte de
//! l'état idle. Les cartes haute capacité sont adressées par bloc, les autres
//! par octet. Toutes les attentes sont bornées par [`CardConfig`].

use crate::crc::{crc16, crc7};
use crate::{BlockDevice, CardConfig, CardInfo, Error, IoError, Result};

/// Bus série vers la carte. `select`/`deselect` pilotent la ligne CS.
pub trait SpiTransport {
    /// Envoie un octet et renvoie l'octet reçu en même temps
    fn transfer(&mut self, byte: u8) -> u8;
    fn select(&mut self);
    fn deselect(&mut self);
    /// `false` : horloge lente (<= 400 kHz) pendant l'initialisation
    fn set_fast_clock(&mut self, fast: bool);
    fn delay_ms(&mut self, ms: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Mmc,
    SdV1,
    SdV2,
    /// SDHC/SDXC, adressage par bloc
    SdHc,
}

const BLOCK_SIZE: usize = 512;

const CMD_GO_IDLE_STATE: u8 = 0;
const CMD_SEND_OP_COND: u8 = 1;
const CMD_SEND_IF_COND: u8 = 8;
const CMD_SEND_CSD: u8 = 9;
const CMD_SEND_CID: u8 = 10;
const CMD_SET_BLOCKLEN: u8 = 16;
const CMD_READ_SINGLE_BLOCK: u8 = 17;
const CMD_WRITE_SINGLE_BLOCK: u8 = 24;
const CMD_APP: u8 = 55;
const CMD_READ_OCR: u8 = 58;
const CMD_CRC_ON_OFF: u8 = 59;
const ACMD_SD_SEND_OP_COND: u8 = 41;

const R1_IDLE_STATE: u8 = 0x01;
const R1_ILLEGAL_COMMAND: u8 = 0x04;

const TOKEN_START_BLOCK: u8 = 0xFE;
const DATA_RESPONSE_MASK: u8 = 0x1F;
const DATA_ACCEPTED: u8 = 0x05;
const DATA_CRC_ERROR: u8 = 0x0B;

const IF_COND_PATTERN: u32 = 0x1AA;
const OCR_CCS: u8 = 0x40;
const ARG_HCS: u32 = 0x4000_0000;

pub struct SdCard<T: SpiTransport> {
    spi: T,
    config: CardConfig,
    card_type: Option<CardType>,
    sector_count: u32,
}

impl<T: SpiTransport> SdCard<T> {
    pub fn new(spi: T, config: CardConfig) -> Self {
        Self {
            spi,
            config,
            card_type: None,
            sector_count: 0,
        }
    }

    /// Crée le pilote et initialise la carte
    pub fn init(spi: T, config: CardConfig) -> Result<Self> {
        let mut card = Self::new(spi, config);
        card.initialize()?;
        Ok(card)
    }

    pub fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    pub fn release(self) -> T {
        self.spi
    }

    /// (Ré)initialise la carte. À refaire après un retrait.
    pub fn initialize(&mut self) -> Result<()> {
        self.card_type = None;
        self.sector_count = 0;

        self.spi.set_fast_clock(false);
        self.spi.deselect();
        // au moins 74 impulsions d'horloge avec CS inactif
        for _ in 0..10 {
            self.spi.transfer(0xFF);
        }

        self.spi.select();
        let result = self.init_selected();
        self.release_bus();

        let (card_type, sector_count) = result?;
        self.spi.set_fast_clock(true);
        self.card_type = Some(card_type);
        self.sector_count = sector_count;
        log::info!("carte initialisée: {:?}, {} secteurs", card_type, sector_count);
        Ok(())
    }

    fn init_selected(&mut self) -> Result<(CardType, u32)> {
        let mut attempts = 0u16;
        loop {
            if let Ok(R1_IDLE_STATE) = self.command(CMD_GO_IDLE_STATE, 0) {
                break;
            }
            attempts += 1;
            if attempts >= self.config.command_retries {
                log::debug!("pas de réponse à CMD0");
                return Err(Error::Io(IoError::Timeout));
            }
        }

        if self.config.crc {
            let r1 = self.command(CMD_CRC_ON_OFF, 1)?;
            if r1 & !R1_IDLE_STATE != 0 {
                return Err(Error::Io(IoError::BadResponse(r1)));
            }
        }

        let mut card_type = self.detect_version()?;
        self.wait_ready(card_type)?;

        if card_type == CardType::SdV2 {
            let r1 = self.command(CMD_READ_OCR, 0)?;
            if r1 != 0 {
                return Err(Error::Io(IoError::BadResponse(r1)));
            }
            let mut ocr = [0u8; 4];
            self.receive(&mut ocr);
            if ocr[0] & OCR_CCS != 0 {
                card_type = CardType::SdHc;
            }
        }

        if card_type != CardType::SdHc {
            let r1 = self.command(CMD_SET_BLOCKLEN, BLOCK_SIZE as u32)?;
            if r1 != 0 {
                return Err(Error::Io(IoError::BadResponse(r1)));
            }
        }

        let csd = self.read_register(CMD_SEND_CSD)?;
        let capacity = crate::card_info::csd_capacity(&csd);
        let sector_count = (capacity / BLOCK_SIZE as u64).min(u32::MAX as u64) as u32;
        Ok((card_type, sector_count))
    }

    fn detect_version(&mut self) -> Result<CardType> {
        let r1 = self.command(CMD_SEND_IF_COND, IF_COND_PATTERN)?;
        if r1 & R1_ILLEGAL_COMMAND == 0 {
            let mut r7 = [0u8; 4];
            self.receive(&mut r7);
            if r7[2] & 0x0f != 0x01 || r7[3] != 0xAA {
                // tension non supportée ou écho faux
                return Err(Error::Io(IoError::BadResponse(r7[3])));
            }
            return Ok(CardType::SdV2);
        }

        let r1 = self.app_command(ACMD_SD_SEND_OP_COND, 0)?;
        if r1 & R1_ILLEGAL_COMMAND == 0 {
            Ok(CardType::SdV1)
        } else {
            Ok(CardType::Mmc)
        }
    }

    fn wait_ready(&mut self, card_type: CardType) -> Result<()> {
        let arg = if card_type == CardType::SdV2 { ARG_HCS } else { 0 };
        let mut waited = 0u32;
        loop {
            let r1 = match card_type {
                CardType::Mmc => self.command(CMD_SEND_OP_COND, 0)?,
                _ => self.app_command(ACMD_SD_SEND_OP_COND, arg)?,
            };
            if r1 & R1_IDLE_STATE == 0 {
                if r1 != 0 {
                    return Err(Error::Io(IoError::BadResponse(r1)));
                }
                return Ok(());
            }
            if waited >= self.config.init_timeout_ms {
                return Err(Error::Io(IoError::Timeout));
            }
            self.spi.delay_ms(1);
            waited += 1;
        }
    }

    /// Lit les registres CID et CSD
    pub fn card_info(&mut self) -> Result<CardInfo> {
        if self.card_type.is_none() {
            return Err(Error::Io(IoError::NotInitialized));
        }
        self.spi.select();
        let result = self
            .read_register(CMD_SEND_CID)
            .and_then(|cid| Ok((cid, self.read_register(CMD_SEND_CSD)?)));
        self.release_bus();

        let (cid, csd) = result?;
        Ok(CardInfo::from_registers(&cid, &csd))
    }

    fn release_bus(&mut self) {
        self.spi.deselect();
        self.spi.transfer(0xFF);
    }

    fn receive(&mut self, buffer: &mut [u8]) {
        for b in buffer.iter_mut() {
            *b = self.spi.transfer(0xFF);
        }
    }

    fn command(&mut self, cmd: u8, arg: u32) -> Result<u8> {
        let a = arg.to_be_bytes();
        let mut frame = [0x40 | cmd, a[0], a[1], a[2], a[3], 0];
        frame[5] = (crc7(&frame[..5]) << 1) | 1;

        self.spi.transfer(0xFF);
        for &b in &frame {
            self.spi.transfer(b);
        }

        for _ in 0..self.config.response_polls {
            let r1 = self.spi.transfer(0xFF);
            if r1 & 0x80 == 0 {
                return Ok(r1);
            }
        }
        Err(Error::Io(IoError::Timeout))
    }

    fn app_command(&mut self, cmd: u8, arg: u32) -> Result<u8> {
        self.command(CMD_APP, 0)?;
        self.command(cmd, arg)
    }

    fn wait_start_token(&mut self) -> Result<()> {
        for _ in 0..self.config.token_polls {
            match self.spi.transfer(0xFF) {
                TOKEN_START_BLOCK => return Ok(()),
                0xFF => {}
                token => return Err(Error::Io(IoError::DataToken(token))),
            }
        }
        Err(Error::Io(IoError::Timeout))
    }

    /// Bloc de données + CRC16, vérifié si le CRC est activé
    fn receive_data(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.wait_start_token()?;
        self.receive(buffer);
        let mut crc = [0u8; 2];
        self.receive(&mut crc);

        if self.config.crc && u16::from_be_bytes(crc) != crc16(buffer) {
            return Err(Error::Io(IoError::Crc));
        }
        Ok(())
    }

    fn read_register(&mut self, cmd: u8) -> Result<[u8; 16]> {
        let r1 = self.command(cmd, 0)?;
        if r1 != 0 {
            return Err(Error::Io(IoError::BadResponse(r1)));
        }
        let mut register = [0u8; 16];
        self.receive_data(&mut register)?;
        Ok(register)
    }

    fn address(&self, sector: u32) -> Result<u32> {
        let card_type = self.card_type.ok_or(Error::Io(IoError::NotInitialized))?;
        if sector >= self.sector_count {
            return Err(Error::Io(IoError::OutOfRange));
        }
        Ok(match card_type {
            CardType::SdHc => sector,
            _ => sector * BLOCK_SIZE as u32,
        })
    }

    fn read_selected(&mut self, address: u32, buffer: &mut [u8]) -> Result<()> {
        let r1 = self.command(CMD_READ_SINGLE_BLOCK, address)?;
        if r1 != 0 {
            return Err(Error::Io(IoError::BadResponse(r1)));
        }
        self.receive_data(buffer)
    }

    fn write_selected(&mut self, address: u32, buffer: &[u8]) -> Result<()> {
        let r1 = self.command(CMD_WRITE_SINGLE_BLOCK, address)?;
        if r1 != 0 {
            return Err(Error::Io(IoError::BadResponse(r1)));
        }

        let crc = if self.config.crc { crc16(buffer) } else { 0xFFFF };
        self.spi.transfer(0xFF);
        self.spi.transfer(TOKEN_START_BLOCK);
        for &b in buffer {
            self.spi.transfer(b);
        }
        for b in crc.to_be_bytes() {
            self.spi.transfer(b);
        }

        match self.spi.transfer(0xFF) & DATA_RESPONSE_MASK {
            DATA_ACCEPTED => {}
            DATA_CRC_ERROR => return Err(Error::Io(IoError::Crc)),
            other => return Err(Error::Io(IoError::WriteRejected(other))),
        }

        // la carte tient la ligne à 0 tant qu'elle programme le bloc
        for _ in 0..self.config.busy_polls {
            if self.spi.transfer(0xFF) != 0x00 {
                return Ok(());
            }
        }
        Err(Error::Io(IoError::Timeout))
    }
}

impl<T: SpiTransport> BlockDevice for SdCard<T> {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() != BLOCK_SIZE {
            return Err(Error::BufferTooSmall);
        }
        let address = self.address(sector)?;

        self.spi.select();
        let result = self.read_selected(address, buffer);
        self.release_bus();

        if let Err(Error::Io(IoError::Crc)) = result {
            log::warn!("CRC invalide en lecture du secteur {}", sector);
        }
        result
    }

    fn write_sector(&mut self, sector: u32, buffer: &[u8]) -> Result<()> {
        if buffer.len() != BLOCK_SIZE {
            return Err(Error::BufferTooSmall);
        }
        let address = self.address(sector)?;

        self.spi.select();
        let result = self.write_selected(address, buffer);
        self.release_bus();
        result
    }

    fn sector_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }
}
