//! Journal entry model

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Rating;
use crate::util::normalize_text_option;
use crate::{Error, Result};

/// A unique identifier for an entry.
///
/// New ids are UUID v7 (time-sortable); ids read back from the remote are
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("entry id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Product form of a journaled strain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrainType {
    #[default]
    Flower,
    Concentrate,
    Edible,
}

impl fmt::Display for StrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Flower => "Flower",
            Self::Concentrate => "Concentrate",
            Self::Edible => "Edible",
        };
        f.write_str(label)
    }
}

impl FromStr for StrainType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flower" => Ok(Self::Flower),
            "concentrate" => Ok(Self::Concentrate),
            "edible" => Ok(Self::Edible),
            other => Err(Error::Validation(format!("unknown strain type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SizeUnit {
    #[default]
    #[serde(rename = "g")]
    Gram,
    #[serde(rename = "oz")]
    Ounce,
    #[serde(rename = "mg")]
    Milligram,
    #[serde(rename = "ml")]
    Milliliter,
    #[serde(rename = "each")]
    Each,
}

impl SizeUnit {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gram => "g",
            Self::Ounce => "oz",
            Self::Milligram => "mg",
            Self::Milliliter => "ml",
            Self::Each => "each",
        }
    }
}

impl FromStr for SizeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "g" | "gram" | "grams" => Ok(Self::Gram),
            "oz" | "ounce" | "ounces" => Ok(Self::Ounce),
            "mg" | "milligram" | "milligrams" => Ok(Self::Milligram),
            "ml" | "milliliter" | "milliliters" => Ok(Self::Milliliter),
            "each" | "unit" | "units" => Ok(Self::Each),
            other => Err(Error::Validation(format!("unknown size unit: {other}"))),
        }
    }
}

/// Quantity purchased, stored remotely as the `size` and `size_unit` columns.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    #[serde(rename = "size")]
    pub amount: f64,
    #[serde(rename = "size_unit")]
    pub unit: SizeUnit,
}

impl Size {
    #[must_use]
    pub const fn new(amount: f64, unit: SizeUnit) -> Self {
        Self { amount, unit }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.symbol())
    }
}

/// A journal entry as stored in the remote `entries` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub user_id: String,
    pub strain: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(rename = "type")]
    pub strain_type: StrainType,
    #[serde(flatten)]
    pub size: Size,
    pub cost: f64,
    pub high_rating: Rating,
    pub flavor_rating: Rating,
    #[serde(default)]
    pub high_description: Option<String>,
    #[serde(default)]
    pub flavor_description: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Entry {
    /// Check the invariants that ratings alone cannot enforce.
    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.strain, self.size, self.cost)?;
        if self.user_id.trim().is_empty() {
            return Err(Error::Validation("entry must have an owner".to_string()));
        }
        Ok(())
    }

    /// Case-insensitive match on strain or brand. Blank queries match all.
    #[must_use]
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.strain.to_lowercase().contains(&needle)
            || self
                .brand
                .as_deref()
                .is_some_and(|brand| brand.to_lowercase().contains(&needle))
    }
}

/// User-supplied fields for a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub strain: String,
    pub brand: Option<String>,
    pub strain_type: StrainType,
    pub size: Size,
    pub cost: f64,
    pub high_rating: Rating,
    pub flavor_rating: Rating,
    pub high_description: Option<String>,
    pub flavor_description: Option<String>,
    pub date: DateTime<Utc>,
    pub image: Option<String>,
}

impl EntryDraft {
    /// Minimal draft with defaults matching the add-entry form.
    #[must_use]
    pub fn new(strain: impl Into<String>) -> Self {
        Self {
            strain: strain.into(),
            brand: None,
            strain_type: StrainType::Flower,
            size: Size::default(),
            cost: 0.0,
            high_rating: Rating::default(),
            flavor_rating: Rating::default(),
            high_description: None,
            flavor_description: None,
            date: Utc::now(),
            image: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.strain, self.size, self.cost)
    }

    /// Assign a fresh id and owner, normalizing optional text.
    pub fn into_entry(self, user_id: &str) -> Result<Entry> {
        self.validate()?;
        let entry = Entry {
            id: EntryId::new(),
            user_id: user_id.to_string(),
            strain: self.strain.trim().to_string(),
            brand: normalize_text_option(self.brand),
            strain_type: self.strain_type,
            size: self.size,
            cost: self.cost,
            high_rating: self.high_rating,
            flavor_rating: self.flavor_rating,
            high_description: normalize_text_option(self.high_description),
            flavor_description: normalize_text_option(self.flavor_description),
            date: self.date,
            image: normalize_text_option(self.image),
        };
        entry.validate()?;
        Ok(entry)
    }
}

/// Partial update for an existing entry. `id` and `user_id` are immutable.
///
/// Nullable columns use `Option<Option<_>>`: `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    pub strain: Option<String>,
    pub brand: Option<Option<String>>,
    pub strain_type: Option<StrainType>,
    pub size: Option<Size>,
    pub cost: Option<f64>,
    pub high_rating: Option<Rating>,
    pub flavor_rating: Option<Rating>,
    pub high_description: Option<Option<String>>,
    pub flavor_description: Option<Option<String>>,
    pub date: Option<DateTime<Utc>>,
    pub image: Option<Option<String>>,
}

impl EntryPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce the patched entry, re-validating the result.
    pub fn apply_to(&self, entry: &Entry) -> Result<Entry> {
        let mut patched = entry.clone();
        if let Some(strain) = &self.strain {
            patched.strain = strain.trim().to_string();
        }
        if let Some(brand) = &self.brand {
            patched.brand = normalize_text_option(brand.clone());
        }
        if let Some(strain_type) = self.strain_type {
            patched.strain_type = strain_type;
        }
        if let Some(size) = self.size {
            patched.size = size;
        }
        if let Some(cost) = self.cost {
            patched.cost = cost;
        }
        if let Some(rating) = self.high_rating {
            patched.high_rating = rating;
        }
        if let Some(rating) = self.flavor_rating {
            patched.flavor_rating = rating;
        }
        if let Some(text) = &self.high_description {
            patched.high_description = normalize_text_option(text.clone());
        }
        if let Some(text) = &self.flavor_description {
            patched.flavor_description = normalize_text_option(text.clone());
        }
        if let Some(date) = self.date {
            patched.date = date;
        }
        if let Some(image) = &self.image {
            patched.image = normalize_text_option(image.clone());
        }
        patched.validate()?;
        Ok(patched)
    }
}

/// Newest first; ties broken by id so the order is total.
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(compare_newest_first);
}

/// Entries whose strain or brand matches `query`, preserving order.
#[must_use]
pub fn filter_entries(entries: &[Entry], query: &str) -> Vec<Entry> {
    entries
        .iter()
        .filter(|entry| entry.matches_query(query))
        .cloned()
        .collect()
}

fn compare_newest_first(left: &Entry, right: &Entry) -> Ordering {
    right
        .date
        .cmp(&left.date)
        .then_with(|| left.id.cmp(&right.id))
}

fn validate_fields(strain: &str, size: Size, cost: f64) -> Result<()> {
    if strain.trim().is_empty() {
        return Err(Error::Validation("strain is required".to_string()));
    }
    if !cost.is_finite() || cost < 0.0 {
        return Err(Error::Validation(
            "cost must be a non-negative number".to_string(),
        ));
    }
    if !size.amount.is_finite() || size.amount < 0.0 {
        return Err(Error::Validation(
            "size must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}
