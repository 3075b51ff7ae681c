//! Horodatage des entrées de répertoire

/// Date et heure au format des entrées FAT (résolution de 2 secondes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// 1980-01-01 00:00:00, la plus petite date représentable
    pub const EPOCH: Self = Self {
        year: 1980,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    pub const fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self { year, month, day, hour, minute, second }
    }

    /// Décode les deux mots `date` et `time` d'une entrée
    pub fn from_fat(date: u16, time: u16) -> Self {
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0f) as u8,
            day: (date & 0x1f) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3f) as u8,
            second: ((time & 0x1f) * 2) as u8,
        }
    }

    pub fn fat_date(&self) -> u16 {
        let year = self.year.clamp(1980, 2107) - 1980;
        year << 9 | (self.month as u16 & 0x0f) << 5 | (self.day as u16 & 0x1f)
    }

    pub fn fat_time(&self) -> u16 {
        (self.hour as u16 & 0x1f) << 11 | (self.minute as u16 & 0x3f) << 5 | (self.second as u16 / 2) & 0x1f
    }
}

impl Default for DateTime {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl core::fmt::Display for DateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Fournit l'heure courante pour horodater les créations et modifications
pub trait TimeSource {
    fn now(&self) -> DateTime;
}

impl<F: Fn() -> DateTime> TimeSource for F {
    fn now(&self) -> DateTime {
        self()
    }
}
