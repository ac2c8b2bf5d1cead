use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::UnknownConsistency;

/// Replica acknowledgement requirement for a single request.
///
/// Closed set: anything not listed here is rejected locally, never forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
#[repr(u16)]
pub enum ConsistencyLevel {
    Any = 0x0000,
    #[default]
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}

impl ConsistencyLevel {
    pub const ALL_LEVELS: [ConsistencyLevel; 11] = [
        Self::Any,
        Self::One,
        Self::Two,
        Self::Three,
        Self::Quorum,
        Self::All,
        Self::LocalQuorum,
        Self::EachQuorum,
        Self::Serial,
        Self::LocalSerial,
        Self::LocalOne,
    ];

    /// Protocol `[short]` code.
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self, UnknownConsistency> {
        Self::ALL_LEVELS
            .into_iter()
            .find(|level| level.code() == code)
            .ok_or_else(|| UnknownConsistency(format!("0x{code:04x}")))
    }

    /// Only SERIAL and LOCAL_SERIAL may be sent as serial consistency.
    pub fn is_serial(self) -> bool {
        matches!(self, Self::Serial | Self::LocalSerial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
            Self::Serial => "SERIAL",
            Self::LocalSerial => "LOCAL_SERIAL",
            Self::LocalOne => "LOCAL_ONE",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = UnknownConsistency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL_LEVELS
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| UnknownConsistency(s.to_string()))
    }
}

impl TryFrom<String> for ConsistencyLevel {
    type Error = UnknownConsistency;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_protocol_table() {
        assert_eq!(ConsistencyLevel::Any.code(), 0);
        assert_eq!(ConsistencyLevel::LocalQuorum.code(), 6);
        assert_eq!(ConsistencyLevel::LocalOne.code(), 10);
        for level in ConsistencyLevel::ALL_LEVELS {
            assert_eq!(ConsistencyLevel::from_code(level.code()), Ok(level));
        }
    }

    #[test]
    fn unknown_levels_are_rejected() {
        assert!(ConsistencyLevel::from_code(0x000B).is_err());
        assert!("LOCAL_TWO".parse::<ConsistencyLevel>().is_err());
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("local_quorum".parse(), Ok(ConsistencyLevel::LocalQuorum));
        assert_eq!("each-quorum".parse(), Ok(ConsistencyLevel::EachQuorum));
        assert_eq!(" ONE ".parse(), Ok(ConsistencyLevel::One));
    }
}
