//! Review records and the output dataset shape.

use serde::{Deserialize, Serialize};

/// Star rating read off the review block, 1-5 when the icon heuristic
/// succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rating {
    Stars(u8),
    Unknown,
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stars(n) => write!(f, "{n}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// One extracted review.
///
/// `fingerprint`, `source_url` and `ordinal` are filled in by the pipeline
/// after the product's crawl finishes: the ordinal is computed post-hoc over
/// the final review count, not the live count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub user: String,
    pub product_variant: String,
    pub rating: Rating,
    /// Never empty: an image-only sentinel or a no-text label is substituted
    /// when the block carried no usable comment text.
    pub comment: String,
    /// Source-locale formatted date string, or the unknown label.
    pub date: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub source_url: String,
    /// Position string `i/total`.
    #[serde(default)]
    pub ordinal: String,
}

/// Outcome of crawling one product URL. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResult {
    pub url: String,
    pub product_name: String,
    /// Site-reported review total, best effort (0 when unavailable).
    pub total_count: u64,
    pub reviews: Vec<Review>,
    pub fingerprint: Option<String>,
    /// True when the product was recognized as a content-duplicate of an
    /// earlier URL in the same job and skipped before the main crawl.
    pub skipped: bool,
    pub duplicate_of_url: Option<String>,
    pub error_occurred: bool,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl ProductResult {
    pub fn duplicate(
        url: impl Into<String>,
        product_name: impl Into<String>,
        fingerprint: String,
        duplicate_of: String,
        logs: Vec<String>,
    ) -> Self {
        Self {
            url: url.into(),
            product_name: product_name.into(),
            total_count: 0,
            reviews: Vec::new(),
            fingerprint: Some(fingerprint),
            skipped: true,
            duplicate_of_url: Some(duplicate_of),
            error_occurred: false,
            error: None,
            logs,
        }
    }

    pub fn failed(
        url: impl Into<String>,
        product_name: impl Into<String>,
        error: impl Into<String>,
        logs: Vec<String>,
    ) -> Self {
        Self {
            url: url.into(),
            product_name: product_name.into(),
            total_count: 0,
            reviews: Vec::new(),
            fingerprint: None,
            skipped: false,
            duplicate_of_url: None,
            error_occurred: true,
            error: Some(error.into()),
            logs,
        }
    }
}

/// One row of the output dataset.
///
/// A crawled product contributes one row per review; a duplicate product
/// contributes a single marker row carrying only the link, the fingerprint
/// and the matched URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    pub link: String,
    pub product_variant: String,
    pub comment: String,
    pub rating: String,
    pub date: String,
    pub user: String,
    pub ordinal: String,
    pub fingerprint: String,
    pub duplicate_of: String,
}

impl OutputRow {
    pub const HEADERS: [&'static str; 9] = [
        "link",
        "product_variant",
        "comment",
        "rating",
        "date",
        "user",
        "ordinal",
        "fingerprint",
        "duplicate_of",
    ];
}

/// Flatten product results into dataset rows, one per review plus one marker
/// row per duplicate product.
pub fn dataset_rows(results: &[ProductResult]) -> Vec<OutputRow> {
    let mut rows = Vec::new();
    for result in results {
        if result.skipped {
            rows.push(OutputRow {
                link: result.url.clone(),
                product_variant: String::new(),
                comment: String::new(),
                rating: String::new(),
                date: String::new(),
                user: String::new(),
                ordinal: String::new(),
                fingerprint: result.fingerprint.clone().unwrap_or_default(),
                duplicate_of: result.duplicate_of_url.clone().unwrap_or_default(),
            });
            continue;
        }
        for review in &result.reviews {
            rows.push(OutputRow {
                link: review.source_url.clone(),
                product_variant: review.product_variant.clone(),
                comment: review.comment.clone(),
                rating: review.rating.to_string(),
                date: review.date.clone(),
                user: review.user.clone(),
                ordinal: review.ordinal.clone(),
                fingerprint: review.fingerprint.clone(),
                duplicate_of: String::new(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(user: &str, comment: &str) -> Review {
        Review {
            user: user.into(),
            product_variant: "Blue / XL".into(),
            rating: Rating::Stars(5),
            comment: comment.into(),
            date: "12 мая 2024".into(),
            fingerprint: "abc123".into(),
            source_url: "https://shop.example/product/widget-1/".into(),
            ordinal: "1/2".into(),
        }
    }

    #[test]
    fn duplicate_contributes_single_marker_row() {
        let full = ProductResult {
            url: "https://shop.example/product/widget-1/".into(),
            product_name: "widget-1".into(),
            total_count: 2,
            reviews: vec![review("anna", "great"), review("boris", "fine")],
            fingerprint: Some("abc123".into()),
            skipped: false,
            duplicate_of_url: None,
            error_occurred: false,
            error: None,
            logs: vec![],
        };
        let dup = ProductResult::duplicate(
            "https://shop.example/product/widget-1-blue/",
            "widget-1-blue",
            "abc123".into(),
            full.url.clone(),
            vec![],
        );

        let rows = dataset_rows(&[full.clone(), dup]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].user, "anna");
        let marker = &rows[2];
        assert_eq!(marker.link, "https://shop.example/product/widget-1-blue/");
        assert_eq!(marker.fingerprint, "abc123");
        assert_eq!(marker.duplicate_of, full.url);
        assert!(marker.comment.is_empty());
        assert!(marker.user.is_empty());
    }

    #[test]
    fn failed_product_contributes_no_rows() {
        let failed = ProductResult::failed(
            "https://shop.example/product/broken/",
            "broken",
            "pagination skip: expected page 4, got 5",
            vec!["log line".into()],
        );
        assert!(dataset_rows(&[failed]).is_empty());
    }

    #[test]
    fn unknown_rating_renders_as_label() {
        assert_eq!(Rating::Unknown.to_string(), "unknown");
        assert_eq!(Rating::Stars(3).to_string(), "3");
    }
}
