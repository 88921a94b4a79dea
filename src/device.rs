//! MCU Chip definition, loaded from the bundled device files
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Known-good fuse values of a part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseDefaults {
    /// Low fuse selecting the internal oscillator at full speed
    #[serde(deserialize_with = "parse_byte")]
    pub low: u8,
    /// High fuse keeping reset and serial programming enabled
    #[serde(deserialize_with = "parse_byte")]
    pub high: u8,
    #[serde(deserialize_with = "parse_byte")]
    pub factory_low: u8,
    #[serde(deserialize_with = "parse_byte")]
    pub factory_high: u8,
}

/// Represents an MCU chip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    pub name: String,
    #[serde(deserialize_with = "parse_signature")]
    pub signature: [u8; 3],
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub flash_size: u32,
    /// Bytes per flash page
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub page_size: u32,
    #[serde(default)]
    pub description: String,
    pub fuses: FuseDefaults,
}

impl ::std::fmt::Display for Chip {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "{}(0x{})", self.name, hex::encode(self.signature))
    }
}

pub struct ChipDB {
    chips: Vec<Chip>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        Ok(ChipDB {
            chips: vec![serde_yaml::from_str(include_str!(
                "../devices/attiny13.yaml"
            ))?],
        })
    }

    pub fn find_chip(signature: [u8; 3]) -> Result<Chip> {
        let db = ChipDB::load()?;
        db.chips
            .into_iter()
            .find(|c| c.signature == signature)
            .ok_or_else(|| {
                anyhow::format_err!("No chip with signature 0x{} known", hex::encode(signature))
            })
    }
}

impl Chip {
    /// The supported part.
    pub fn attiny13() -> Result<Chip> {
        ChipDB::find_chip([0x1e, 0x90, 0x07])
    }

    pub const fn words_per_page(&self) -> u32 {
        self.page_size / 2
    }

    pub const fn page_count(&self) -> u32 {
        self.flash_size / self.page_size
    }
}

fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(n) = s.strip_suffix("KiB") {
        n.parse::<u32>().map(|n| n * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        n.parse::<u32>().map(|n| n * 1024)
    } else if let Some(n) = s.strip_suffix("K") {
        n.parse::<u32>().map(|n| n * 1024)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("error while parsing {:?}: {}", s, e))
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_number(&s).map_err(serde::de::Error::custom)
}

fn parse_byte<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    let n = parse_number(&s).map_err(serde::de::Error::custom)?;
    u8::try_from(n).map_err(|_| serde::de::Error::custom(format!("{:?} is not a byte", s)))
}

fn parse_signature<'de, D>(deserializer: D) -> std::result::Result<[u8; 3], D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<String> = serde::Deserialize::deserialize(deserializer)?;
    let bytes = raw
        .iter()
        .map(|s| {
            parse_number(s).and_then(|n| u8::try_from(n).map_err(|_| format!("{:?} is not a byte", s)))
        })
        .collect::<std::result::Result<Vec<u8>, String>>()
        .map_err(serde::de::Error::custom)?;
    bytes
        .try_into()
        .map_err(|_| serde::de::Error::custom("signature must be 3 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_attiny13() {
        let chip = Chip::attiny13().unwrap();
        assert_eq!(chip.name, "ATtiny13");
        assert_eq!(chip.flash_size, 1024);
        assert_eq!(chip.page_size, 32);
        assert_eq!(chip.words_per_page(), 16);
        assert_eq!(chip.page_count(), 32);
        assert_eq!(chip.fuses.low, 0x7a);
        assert_eq!(chip.fuses.high, 0xff);
        assert_eq!(chip.to_string(), "ATtiny13(0x1e9007)");
    }

    #[test]
    fn unknown_signature() {
        assert!(ChipDB::find_chip([0x1e, 0x95, 0x0f]).is_err());
    }

    #[test]
    fn number_formats() {
        assert_eq!(parse_number("0x1E"), Ok(0x1e));
        assert_eq!(parse_number("1K"), Ok(1024));
        assert_eq!(parse_number("2KiB"), Ok(2048));
        assert_eq!(parse_number("32"), Ok(32));
        assert!(parse_number("lots").is_err());
    }
}
