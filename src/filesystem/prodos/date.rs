/// Packed ProDOS date and time words
///
/// Date word: bits 15-9 year (offset from 1900, values below 40 meaning
/// 2000+), bits 8-5 month (1-12), bits 4-0 day (1-31). Time word: high
/// byte hour, low byte minute. A zero date word means "no date".

use chrono::{Datelike, Local, Timelike};

/// A decoded ProDOS timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProdosDateTime {
    /// Full year (1940-2039 representable)
    pub year: u16,
    /// Month, 1-12
    pub month: u8,
    /// Day of month, 1-31
    pub day: u8,
    /// Hour, 0-23
    pub hour: u8,
    /// Minute, 0-59
    pub minute: u8,
}

impl ProdosDateTime {
    /// Current local time
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            year: now.year().clamp(1940, 2039) as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }

    /// Pack into the on-disk (date, time) word pair.
    ///
    /// Years outside the representable 1940-2039 window are clamped.
    pub fn to_words(&self) -> (u16, u16) {
        let year = self.year.clamp(1940, 2039);
        let year_bits = if year >= 2000 {
            year - 2000
        } else {
            year - 1900
        };
        let date = (year_bits << 9) | ((self.month as u16) << 5) | self.day as u16;
        let time = ((self.hour as u16) << 8) | self.minute as u16;
        (date, time)
    }

    /// Unpack an on-disk word pair; `None` for the zero "no date" word
    /// or out-of-range fields
    pub fn from_words(date: u16, time: u16) -> Option<Self> {
        if date == 0 {
            return None;
        }
        let year_bits = (date >> 9) & 0x7F;
        let month = ((date >> 5) & 0xF) as u8;
        let day = (date & 0x1F) as u8;
        let hour = (time >> 8) as u8;
        let minute = (time & 0xFF) as u8;

        if month == 0 || month > 12 || day == 0 || day > 31 || hour > 23 || minute > 59 {
            return None;
        }

        let year = if year_bits < 40 {
            2000 + year_bits
        } else {
            1900 + year_bits
        };
        Some(Self {
            year,
            month,
            day,
            hour,
            minute,
        })
    }
}

impl std::fmt::Display for ProdosDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}
