//! Read-only catalog of reference hairstyles.
//!
//! The catalog only supplies reference photos; nothing in the synthesis
//! pipeline depends on it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_MAX_RECORDS: usize = 20;
const MAX_RECORDS_LIMIT: usize = 100;

/// Parse a categorical attribute case-insensitively; unknown values are `None`
pub trait Attribute: Sized + Copy + 'static {
    const ALL: &'static [(&'static str, Self)];

    fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|(name, _)| *name == value)
            .map(|(_, attr)| *attr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HairColor {
    Black,
    Brown,
    Blonde,
}

impl Attribute for HairColor {
    const ALL: &'static [(&'static str, Self)] = &[
        ("black", Self::Black),
        ("brown", Self::Brown),
        ("blonde", Self::Blonde),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ethnicity {
    Asian,
    Black,
    White,
    Brown,
}

impl Attribute for Ethnicity {
    const ALL: &'static [(&'static str, Self)] = &[
        ("asian", Self::Asian),
        ("black", Self::Black),
        ("white", Self::White),
        ("brown", Self::Brown),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Attribute for Sex {
    const ALL: &'static [(&'static str, Self)] = &[("male", Self::Male), ("female", Self::Female)];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Length {
    Short,
    Medium,
    Long,
}

impl Attribute for Length {
    const ALL: &'static [(&'static str, Self)] = &[
        ("short", Self::Short),
        ("medium", Self::Medium),
        ("long", Self::Long),
    ];
}

/// One reference style
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleRecord {
    pub name: String,
    pub image_url: String,
    pub hair_color: Option<HairColor>,
    pub ethnicity: Option<Ethnicity>,
    pub sex: Option<Sex>,
    pub length: Option<Length>,
    pub external_link: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StyleFilter {
    pub hair_color: Option<HairColor>,
    pub ethnicity: Option<Ethnicity>,
    pub sex: Option<Sex>,
    pub length: Option<Length>,
    pub max_records: Option<usize>,
}

impl StyleFilter {
    /// Record limit, defaulting to 20 and clamped to 1..=100
    pub fn limit(&self) -> usize {
        self.max_records
            .unwrap_or(DEFAULT_MAX_RECORDS)
            .clamp(1, MAX_RECORDS_LIMIT)
    }

    pub fn matches(&self, record: &StyleRecord) -> bool {
        fn wanted<T: PartialEq>(filter: Option<T>, value: Option<T>) -> bool {
            filter.map_or(true, |f| value == Some(f))
        }

        !record.name.is_empty()
            && !record.image_url.is_empty()
            && wanted(self.hair_color, record.hair_color)
            && wanted(self.ethnicity, record.ethnicity)
            && wanted(self.sex, record.sex)
            && wanted(self.length, record.length)
    }
}

#[async_trait]
pub trait StyleCatalog: Send + Sync {
    async fn styles(&self, filter: &StyleFilter) -> Result<Vec<StyleRecord>>;

    /// Find a style by name, ignoring case
    async fn find(&self, name: &str) -> Result<Option<StyleRecord>> {
        let all = StyleFilter {
            max_records: Some(MAX_RECORDS_LIMIT),
            ..StyleFilter::default()
        };
        Ok(self
            .styles(&all)
            .await?
            .into_iter()
            .find(|record| record.name.eq_ignore_ascii_case(name)))
    }
}

/// Catalog stored as a JSON array of records
pub struct JsonCatalog {
    path: PathBuf,
}

impl JsonCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StyleCatalog for JsonCatalog {
    async fn styles(&self, filter: &StyleFilter) -> Result<Vec<StyleRecord>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read catalog {}", self.path.display()))?;
        let records: Vec<StyleRecord> =
            serde_json::from_str(&contents).context("Failed to parse catalog")?;

        Ok(records
            .into_iter()
            .filter(|record| filter.matches(record))
            .take(filter.limit())
            .collect())
    }
}
