//! Core protocol types shared by dosers and lights.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ParseError, ParseResult};

/// Byte value reserved as a framing sentinel on the wire.
pub const RESERVED_BYTE: u8 = 0x5A;

/// Message ids whose high byte reaches this value are considered exhausted.
pub const MESSAGE_ID_EXHAUSTED_HI: u8 = 230;

/// Kind of aquarium peripheral.
///
/// The kind is fixed per physical device and derived from the model code in
/// its advertised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// Multi-head dosing pump.
    Doser,
    /// Multi-channel LED light.
    Light,
}

impl DeviceKind {
    /// All kinds, in a stable order.
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Doser, DeviceKind::Light];

    /// Lowercase identifier used in logs and persisted records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Doser => "doser",
            DeviceKind::Light => "light",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = ParseError;

    /// Parse a kind name, case-insensitively.
    ///
    /// ```
    /// use aquable_types::DeviceKind;
    ///
    /// assert_eq!("Doser".parse::<DeviceKind>(), Ok(DeviceKind::Doser));
    /// assert_eq!("light".parse::<DeviceKind>(), Ok(DeviceKind::Light));
    /// assert!("pump".parse::<DeviceKind>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doser" => Ok(DeviceKind::Doser),
            "light" => Ok(DeviceKind::Light),
            other => Err(ParseError::InvalidValue(format!(
                "unknown device kind '{other}'"
            ))),
        }
    }
}

/// Day of the week as used by schedule masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// Monday through Sunday.
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    /// Bit of this day in a 7-bit weekday mask (bit 6 = Monday, bit 0 = Sunday).
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Weekday::Monday => 0x40,
            Weekday::Tuesday => 0x20,
            Weekday::Wednesday => 0x10,
            Weekday::Thursday => 0x08,
            Weekday::Friday => 0x04,
            Weekday::Saturday => 0x02,
            Weekday::Sunday => 0x01,
        }
    }

    /// ISO weekday number, Monday = 1.
    #[must_use]
    pub const fn iso_number(self) -> u8 {
        match self {
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
            Weekday::Sunday => 7,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    /// Parse a list of day names into weekdays.
    ///
    /// `"everyday"` expands to all seven days. Duplicates are removed and
    /// the result is ordered Monday → Sunday.
    ///
    /// ```
    /// use aquable_types::Weekday;
    ///
    /// let days = Weekday::parse_list(["fri", "Monday", "monday"]).unwrap();
    /// assert_eq!(days, vec![Weekday::Monday, Weekday::Friday]);
    /// assert_eq!(Weekday::parse_list(["everyday"]).unwrap().len(), 7);
    /// ```
    pub fn parse_list<I, S>(names: I) -> ParseResult<Vec<Weekday>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut days = Vec::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().eq_ignore_ascii_case("everyday") {
                return Ok(Weekday::ALL.to_vec());
            }
            days.push(name.parse::<Weekday>()?);
        }
        days.sort();
        days.dedup();
        Ok(days)
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weekday {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Weekday::ALL
            .into_iter()
            .find(|day| day.as_str() == lower || (lower.len() == 3 && day.as_str().starts_with(&lower)))
            .ok_or_else(|| ParseError::InvalidValue(format!("unknown weekday '{s}'")))
    }
}

/// Two-byte message sequence number carried in every command frame.
///
/// Neither byte is ever [`RESERVED_BYTE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "(u8, u8)", into = "(u8, u8)"))]
pub struct MessageId {
    hi: u8,
    lo: u8,
}

impl MessageId {
    /// The id every session starts from.
    pub const INITIAL: MessageId = MessageId { hi: 0, lo: 1 };

    /// Build a message id from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::ReservedByte`] if either byte is 0x5A.
    pub fn new(hi: u8, lo: u8) -> ParseResult<Self> {
        if hi == RESERVED_BYTE || lo == RESERVED_BYTE {
            return Err(ParseError::ReservedByte("message id"));
        }
        Ok(Self { hi, lo })
    }

    #[must_use]
    pub const fn hi(self) -> u8 {
        self.hi
    }

    #[must_use]
    pub const fn lo(self) -> u8 {
        self.lo
    }

    /// The successor id.
    ///
    /// Increments the low byte, carrying into the high byte, skipping the
    /// reserved value in both positions. `(255, 255)` wraps to `(0, 1)`.
    ///
    /// ```
    /// use aquable_types::MessageId;
    ///
    /// let id = MessageId::new(0, 89).unwrap().next();
    /// assert_eq!((id.hi(), id.lo()), (0, 91));
    ///
    /// let id = MessageId::new(89, 255).unwrap().next();
    /// assert_eq!((id.hi(), id.lo()), (91, 0));
    /// ```
    #[must_use]
    pub const fn next(self) -> Self {
        let (hi, lo) = match (self.hi, self.lo) {
            (255, 255) => (0, 1),
            (89, 255) => (91, 0),
            (hi, 255) => (hi + 1, 0),
            (hi, 89) => (hi, 91),
            (hi, lo) => (hi, lo + 1),
        };
        Self { hi, lo }
    }

    /// Whether the id has climbed far enough that the session should restart.
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        self.hi >= MESSAGE_ID_EXHAUSTED_HI
    }
}

impl TryFrom<(u8, u8)> for MessageId {
    type Error = ParseError;

    fn try_from((hi, lo): (u8, u8)) -> ParseResult<Self> {
        Self::new(hi, lo)
    }
}

impl From<MessageId> for (u8, u8) {
    fn from(id: MessageId) -> Self {
        (id.hi, id.lo)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.hi, self.lo)
    }
}

/// Wall-clock time of day with minute resolution, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidValue`] when hour > 23 or minute > 59.
    pub fn new(hour: u8, minute: u8) -> ParseResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(ParseError::InvalidValue(format!(
                "time {hour:02}:{minute:02} out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    #[must_use]
    pub const fn hour(self) -> u8 {
        self.hour
    }

    #[must_use]
    pub const fn minute(self) -> u8 {
        self.minute
    }

    /// Minutes since midnight.
    #[must_use]
    pub const fn minutes_of_day(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = ParseError;

    /// ```
    /// use aquable_types::ClockTime;
    ///
    /// let t: ClockTime = "08:30".parse().unwrap();
    /// assert_eq!((t.hour(), t.minute()), (8, 30));
    /// assert!("24:00".parse::<ClockTime>().is_err());
    /// assert!("8.30".parse::<ClockTime>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidValue(format!("expected HH:MM, got '{s}'"));
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour = h.parse::<u8>().map_err(|_| invalid())?;
        let minute = m.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

#[cfg(feature = "serde")]
impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
