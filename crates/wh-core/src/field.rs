use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};

/// A column of a script's output, with the assertion tags parsed from its
/// preceding trailing `--` comment block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Field {
    pub name: String,
    pub tags: Vec<FieldTag>,
    pub description: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, tags: Vec<FieldTag>) -> Self {
        Self {
            name: name.into(),
            tags,
            description: None,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.tags.iter().any(|t| matches!(t, FieldTag::Unique))
    }

    pub fn is_incremental(&self) -> bool {
        self.tags.iter().any(|t| matches!(t, FieldTag::Incremental))
    }
}

/// A parsed `#TAG` annotation on a field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum FieldTag {
    NoNulls,
    Unique,
    UniqueBy(String),
    Set(Vec<String>),
    Incremental,
}

static UNIQUE_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#UNIQUE_BY\((?P<by>.+)\)$").unwrap());
static SET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#SET\{(?P<elements>\w+(?:,\s*\w+)*)\}$").unwrap());

impl FieldTag {
    /// Parse a single `#TAG` token (no surrounding whitespace).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw {
            "#NO_NULLS" => Ok(FieldTag::NoNulls),
            "#UNIQUE" => Ok(FieldTag::Unique),
            "#INCREMENTAL" => Ok(FieldTag::Incremental),
            _ => {
                if let Some(caps) = UNIQUE_BY_RE.captures(raw) {
                    return Ok(FieldTag::UniqueBy(caps["by"].trim().to_string()));
                }
                if let Some(caps) = SET_RE.captures(raw) {
                    let elements = caps["elements"]
                        .split(',')
                        .map(|e| e.trim().to_string())
                        .collect();
                    return Ok(FieldTag::Set(elements));
                }
                Err(CoreError::InvalidFieldTag(raw.to_string()))
            }
        }
    }
}

/// Parse every `#TAG` token out of a trailing-comment block such as
/// `-- #NO_NULLS #UNIQUE`. Unrecognized non-tag words are ignored, since a
/// comment block may carry free-text description alongside tags.
pub fn parse_tags(comment: &str) -> Result<Vec<FieldTag>> {
    comment
        .split_whitespace()
        .filter(|tok| tok.starts_with('#'))
        .map(FieldTag::parse)
        .collect()
}

#[cfg(test)]
#[path = "field_test.rs"]
mod tests;
