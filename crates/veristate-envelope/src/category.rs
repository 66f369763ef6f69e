//! Artifact categories
//!
//! Categories organize blobs under a workflow's key prefix and form the first
//! segment of legacy `{category}_{file}` reference names.

use serde::{Deserialize, Serialize};

/// Artifact category within a workflow's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Image data (encoded payloads and metadata)
    Images,
    /// Prompts and conversation setup
    Prompts,
    /// Inference responses and conversation history
    Responses,
    /// Intermediate processing results
    Processing,
}

impl Category {
    /// All categories, in key order
    pub const ALL: [Category; 4] = [
        Category::Images,
        Category::Prompts,
        Category::Responses,
        Category::Processing,
    ];

    /// Key segment / legacy name prefix for this category
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Images => "images",
            Category::Prompts => "prompts",
            Category::Responses => "responses",
            Category::Processing => "processing",
        }
    }

    /// Canonical reference name for a file in this category
    ///
    /// This is the `{category}_{file}` form used both in envelopes produced by
    /// current stages and in the legacy flat wire format.
    #[must_use]
    pub fn reference_name(self, file: &str) -> String {
        let file = file.strip_suffix(".json").unwrap_or(file);
        format!("{}_{}", self.as_str(), file.replace(['/', '-'], "_"))
    }

    /// Split a `{category}_{file}` reference name into its parts
    ///
    /// Returns `None` when the prefix is not a known category, which is how
    /// the resolver recognizes unmappable legacy keys.
    #[must_use]
    pub fn parse_reference_name(name: &str) -> Option<(Category, &str)> {
        let (prefix, file) = name.split_once('_')?;
        let category = prefix.parse().ok()?;
        if file.is_empty() {
            return None;
        }
        Some((category, file))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" => Ok(Category::Images),
            "prompts" => Ok(Category::Prompts),
            "responses" => Ok(Category::Responses),
            "processing" => Ok(Category::Processing),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Error returned when a string is not a known category
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reference_name_strips_extension_and_separators() {
        assert_eq!(Category::Images.reference_name("metadata.json"), "images_metadata");
        assert_eq!(
            Category::Processing.reference_name("turn1/analysis"),
            "processing_turn1_analysis"
        );
    }

    #[test]
    fn parse_reference_name_roundtrip() {
        let (cat, file) = Category::parse_reference_name("images_metadata").unwrap();
        assert_eq!(cat, Category::Images);
        assert_eq!(file, "metadata");

        // Underscores in the file part stay with the file
        let (cat, file) = Category::parse_reference_name("processing_historical_context").unwrap();
        assert_eq!(cat, Category::Processing);
        assert_eq!(file, "historical_context");
    }

    #[test]
    fn parse_reference_name_rejects_unknown_prefix() {
        assert!(Category::parse_reference_name("layout_metadata").is_none());
        assert!(Category::parse_reference_name("images").is_none());
        assert!(Category::parse_reference_name("images_").is_none());
    }
}
