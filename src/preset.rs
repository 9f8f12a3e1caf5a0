//! Preset value objects and the ordered, duplicate-free preset list

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// One remembered image dimension.
///
/// Serialised as `{"w": 128, "h": 128}` so lists written by other instances
/// stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preset {
    pub w: u32,
    pub h: u32,
}

impl Preset {
    /// Create a preset, rejecting zero-sized dimensions
    pub fn new(w: u32, h: u32) -> Result<Self> {
        if w == 0 || h == 0 {
            return Err(Error::InvalidDimension(format!("{}x{}", w, h)));
        }
        Ok(Self { w, h })
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.w, self.h)
    }
}

impl FromStr for Preset {
    type Err = Error;

    /// Parses `300x200`, `300 X 200` and similar.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidDimension(format!("expected WxH, got {:?}", s));
        let (w, h) = s.trim().split_once(|c: char| c == 'x' || c == 'X').ok_or_else(invalid)?;
        let (w, h) = (w.trim_end(), h.trim_start());
        let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(w) || !all_digits(h) {
            return Err(invalid());
        }
        let w = w.parse::<u32>().map_err(|_| invalid())?;
        let h = h.parse::<u32>().map_err(|_| invalid())?;
        Preset::new(w, h)
    }
}

/// The presets seeded the first time the backend holds nothing.
pub fn default_presets() -> Vec<Preset> {
    vec![
        Preset { w: 128, h: 128 },
        Preset { w: 256, h: 256 },
        Preset { w: 512, h: 512 },
    ]
}

/// Insertion-ordered presets with no two entries sharing `(w, h)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetList {
    items: Vec<Preset>,
}

impl PresetList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from arbitrary input, keeping the first occurrence of
    /// each pair.
    pub fn from_presets<I: IntoIterator<Item = Preset>>(presets: I) -> Self {
        let mut list = Self::new();
        list.extend_unique(presets);
        list
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, preset: &Preset) -> bool {
        self.items.contains(preset)
    }

    pub fn get(&self, index: usize) -> Option<Preset> {
        self.items.get(index).copied()
    }

    pub fn as_slice(&self) -> &[Preset] {
        &self.items
    }

    /// Append unless already present; returns whether the list changed
    pub fn push_unique(&mut self, preset: Preset) -> bool {
        if self.contains(&preset) {
            return false;
        }
        self.items.push(preset);
        true
    }

    /// Append every preset not yet present, in order
    pub fn extend_unique<I: IntoIterator<Item = Preset>>(&mut self, presets: I) {
        let mut seen: HashSet<Preset> = self.items.iter().copied().collect();
        for p in presets {
            if seen.insert(p) {
                self.items.push(p);
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Preset> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    /// Replace the entry at `index`. Fails when out of range or when the
    /// replacement duplicates a different entry.
    pub fn replace(&mut self, index: usize, preset: Preset) -> Result<Preset> {
        let len = self.items.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        if self
            .items
            .iter()
            .enumerate()
            .any(|(i, p)| i != index && *p == preset)
        {
            return Err(Error::DuplicatePreset(preset));
        }
        Ok(std::mem::replace(&mut self.items[index], preset))
    }

    pub fn to_vec(&self) -> Vec<Preset> {
        self.items.clone()
    }

    /// JSON array form used for persistence
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.items
                .iter()
                .map(|p| serde_json::json!({ "w": p.w, "h": p.h }))
                .collect(),
        )
    }

    /// Read a persisted value. Anything that is not an array reads as absent;
    /// malformed or zero-sized entries inside an array are skipped.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let entries = value.as_array()?;
        let mut list = Self::new();
        for entry in entries {
            match serde_json::from_value::<Preset>(entry.clone()) {
                Ok(p) if p.w > 0 && p.h > 0 => {
                    list.push_unique(p);
                }
                _ => log::warn!("Skipping malformed preset entry: {}", entry),
            }
        }
        Some(list)
    }
}

impl From<Vec<Preset>> for PresetList {
    fn from(v: Vec<Preset>) -> Self {
        Self::from_presets(v)
    }
}

impl<'a> IntoIterator for &'a PresetList {
    type Item = &'a Preset;
    type IntoIter = std::slice::Iter<'a, Preset>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
