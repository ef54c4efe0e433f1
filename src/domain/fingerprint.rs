//! Content fingerprinting for duplicate product detection.
//!
//! Size/color variant pages of the same underlying product render identical
//! review sets under different URLs. Hashing a canonicalized, order-sorted
//! sample of reviews identifies "the same product" independent of URL.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::domain::review::Review;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Collapse all runs of Unicode whitespace (including non-breaking spaces)
/// to single spaces, trim, and lower-case.
pub fn canonicalize(text: &str) -> String {
    WHITESPACE
        .replace_all(text, " ")
        .trim()
        .to_lowercase()
}

#[derive(Serialize)]
struct CanonicalReview {
    user: String,
    rating: String,
    comment: String,
    date: String,
}

/// Stable content hash over a set of reviews.
///
/// The same multiset of reviews in any input order yields the same hash:
/// tuples are sorted by the concatenation of user+date+comment before
/// serialization. Rating participates in the payload but not in the sort
/// key. Used for equality comparison only.
pub fn fingerprint(reviews: &[Review]) -> String {
    let mut simplified: Vec<CanonicalReview> = reviews
        .iter()
        .map(|r| CanonicalReview {
            user: canonicalize(&r.user),
            rating: r.rating.to_string(),
            comment: canonicalize(&r.comment),
            date: canonicalize(&r.date),
        })
        .collect();

    simplified.sort_by(|a, b| {
        let key_a = format!("{}{}{}", a.user, a.date, a.comment);
        let key_b = format!("{}{}{}", b.user, b.date, b.comment);
        key_a.cmp(&key_b)
    });

    let payload =
        serde_json::to_string(&simplified).expect("canonical reviews always serialize");
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::review::Rating;
    use proptest::prelude::*;

    fn review(user: &str, rating: Rating, comment: &str, date: &str) -> Review {
        Review {
            user: user.into(),
            product_variant: String::new(),
            rating,
            comment: comment.into(),
            date: date.into(),
            fingerprint: String::new(),
            source_url: String::new(),
            ordinal: String::new(),
        }
    }

    #[test]
    fn canonicalization_collapses_nbsp_and_case() {
        assert_eq!(canonicalize("  Anna\u{00A0}\u{00A0}Petrova \n"), "anna petrova");
        assert_eq!(canonicalize("GOOD\tvalue"), "good value");
    }

    #[test]
    fn input_order_does_not_change_the_hash() {
        let a = review("anna", Rating::Stars(5), "great product", "12 мая 2024");
        let b = review("boris", Rating::Stars(1), "broke in a week", "3 июня 2024");
        let c = review("vera", Rating::Unknown, "", "unknown");

        let forward = fingerprint(&[a.clone(), b.clone(), c.clone()]);
        let backward = fingerprint(&[c, b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn whitespace_variants_of_the_same_reviews_match() {
        let plain = review("Anna", Rating::Stars(4), "good value", "12 мая 2024");
        let noisy = review("anna ", Rating::Stars(4), "good\u{00A0} value", " 12  мая 2024");
        assert_eq!(fingerprint(&[plain]), fingerprint(&[noisy]));
    }

    #[test]
    fn rating_is_part_of_the_payload() {
        let five = review("anna", Rating::Stars(5), "good", "12 мая 2024");
        let one = review("anna", Rating::Stars(1), "good", "12 мая 2024");
        assert_ne!(fingerprint(&[five]), fingerprint(&[one]));
    }

    #[test]
    fn different_content_produces_different_hashes() {
        let a = review("anna", Rating::Stars(5), "good", "12 мая 2024");
        let b = review("anna", Rating::Stars(5), "bad", "12 мая 2024");
        assert_ne!(fingerprint(&[a]), fingerprint(&[b]));
    }

    proptest! {
        #[test]
        fn shuffled_permutations_always_agree(
            users in proptest::collection::vec("[a-zа-я]{1,10}", 1..8),
            seed in any::<u64>(),
        ) {
            let reviews: Vec<Review> = users
                .iter()
                .enumerate()
                .map(|(i, u)| review(u, Rating::Stars((i % 5) as u8 + 1), &format!("comment {i}"), "12 мая 2024"))
                .collect();

            let mut shuffled = reviews.clone();
            let mut rng = fastrand::Rng::with_seed(seed);
            rng.shuffle(&mut shuffled);

            prop_assert_eq!(fingerprint(&reviews), fingerprint(&shuffled));
        }
    }
}
