//! Sparse flash content, keyed by byte address.
use std::collections::BTreeMap;
use std::ops::Range;

use anyhow::Result;

use crate::constants::ERASED_BYTE;
use crate::error::IspError;

/// Addresses not present are unspecified and treated as erased (0xFF).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: BTreeMap<u32, u8>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contiguous content starting at `base`.
    pub fn from_bytes(base: u32, data: &[u8]) -> Result<Self> {
        let mut image = Self::new();
        image.extend(base, data)?;
        Ok(image)
    }

    pub fn insert(&mut self, address: u32, value: u8) {
        self.bytes.insert(address, value);
    }

    /// Fails with [`IspError::AddressOverflow`] when `data` would run past
    /// 0xFFFF_FFFF; nothing is inserted then.
    pub fn extend(&mut self, base: u32, data: &[u8]) -> Result<()> {
        if let Some(last) = data.len().checked_sub(1) {
            let end = u32::try_from(last).ok().and_then(|last| base.checked_add(last));
            if end.is_none() {
                return Err(IspError::AddressOverflow {
                    base,
                    len: data.len(),
                }
                .into());
            }
        }
        for (address, &value) in (base..=u32::MAX).zip(data) {
            self.insert(address, value);
        }
        Ok(())
    }

    pub fn get(&self, address: u32) -> Option<u8> {
        self.bytes.get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn min_address(&self) -> Option<u32> {
        self.bytes.keys().next().copied()
    }

    pub fn max_address(&self) -> Option<u32> {
        self.bytes.keys().next_back().copied()
    }

    /// Ascending (address, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.bytes.iter().map(|(&a, &v)| (a, v))
    }

    pub fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.bytes.keys().copied()
    }

    /// Word addresses touched by the image, ascending and deduplicated.
    pub fn word_addresses(&self) -> Vec<u32> {
        let mut words: Vec<u32> = self.addresses().map(|a| a / 2).collect();
        words.dedup();
        words
    }

    /// Byte range of whole pages spanning the lowest through highest populated
    /// address, clamped to `flash_size`. `None` for an empty image.
    pub fn page_range(&self, page_size: u32, flash_size: u32) -> Option<Range<u32>> {
        let min = self.min_address()?;
        let max = self.max_address()?;
        let start = min - min % page_size;
        let end = (max - max % page_size)
            .saturating_add(page_size)
            .min(flash_size);
        Some(start..end)
    }

    /// `len` bytes from `base`, unspecified bytes padded with 0xFF.
    pub fn padded(&self, base: u32, len: u32) -> Vec<u8> {
        (base..base + len)
            .map(|address| self.get(address).unwrap_or(ERASED_BYTE))
            .collect()
    }

    /// Split into runs of consecutive addresses.
    pub fn runs(&self) -> Vec<(u32, Vec<u8>)> {
        let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
        for (address, value) in self.iter() {
            match runs.last_mut() {
                Some((start, data)) if u64::from(*start) + data.len() as u64 == u64::from(address) => {
                    data.push(value)
                }
                _ => runs.push((address, vec![value])),
            }
        }
        runs
    }
}

impl FromIterator<(u32, u8)> for MemoryImage {
    fn from_iter<I: IntoIterator<Item = (u32, u8)>>(iter: I) -> Self {
        MemoryImage {
            bytes: iter.into_iter().collect(),
        }
    }
}
