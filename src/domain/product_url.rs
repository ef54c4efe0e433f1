//! Product URL manipulation: review-endpoint construction and page-number
//! parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::domain::error::CrawlError;

static PRODUCT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"product/([^/?]+)").expect("static regex"));
static PAGE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]page=(\d+)").expect("static regex"));

/// Turn a product URL into its reviews endpoint, keeping any query string.
pub fn reviews_url(product_url: &str) -> String {
    match product_url.split_once('?') {
        Some((base, params)) => format!("{base}reviews?{params}"),
        None => format!("{product_url}reviews"),
    }
}

/// Reviews endpoint with an explicit sort parameter (replacing any existing
/// one). The ascending-score sort is used for fingerprint probes because it
/// is stable against the default sort's reshuffling.
pub fn reviews_url_with_sort(product_url: &str, sort: &str) -> Result<String, CrawlError> {
    let mut url = Url::parse(&reviews_url(product_url))
        .map_err(|e| CrawlError::Navigation(format!("bad product url {product_url}: {e}")))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "sort")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("sort", sort);
    }
    Ok(url.to_string())
}

/// Slug from the `product/<slug>` path segment.
pub fn product_name(url: &str) -> Option<String> {
    PRODUCT_NAME
        .captures(url)
        .map(|c| c[1].to_string())
}

/// Page number from the `page` query parameter; a URL without one is page 1.
pub fn page_number(url: &str) -> u32 {
    PAGE_PARAM
        .captures(url)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviews_url_without_query() {
        assert_eq!(
            reviews_url("https://shop.example/product/widget-123/"),
            "https://shop.example/product/widget-123/reviews"
        );
    }

    #[test]
    fn reviews_url_preserves_query() {
        assert_eq!(
            reviews_url("https://shop.example/product/widget-123/?from=search"),
            "https://shop.example/product/widget-123/reviews?from=search"
        );
    }

    #[test]
    fn sort_parameter_is_replaced_not_duplicated() {
        let url = reviews_url_with_sort(
            "https://shop.example/product/widget-123/?sort=published_at_desc",
            "score_asc",
        )
        .unwrap();
        assert_eq!(url.matches("sort=").count(), 1);
        assert!(url.contains("sort=score_asc"));
    }

    #[test]
    fn product_name_is_the_path_slug() {
        assert_eq!(
            product_name("https://shop.example/product/widget-123/?from=search").as_deref(),
            Some("widget-123")
        );
        assert_eq!(product_name("https://shop.example/cart"), None);
    }

    #[test]
    fn page_number_defaults_to_one() {
        assert_eq!(page_number("https://shop.example/product/x/reviews"), 1);
        assert_eq!(page_number("https://shop.example/product/x/reviews?page=7"), 7);
        assert_eq!(
            page_number("https://shop.example/product/x/reviews?sort=score_asc&page=12"),
            12
        );
    }
}
