//! Heuristic review extraction from raw page markup.
//!
//! Pure: markup + mode in, structured reviews + stop signal out. Review
//! blocks carry no semantic field markup, so fields are inferred from a
//! flattened text-leaf list by positional and pattern rules. The rule order
//! is load-bearing - name, then date, then comment assembly, then the
//! strict-mode stop check, then rating, then the text-only skip.

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::domain::error::CrawlError;
use crate::domain::job::ExtractionMode;
use crate::domain::review::{Rating, Review};
use crate::infrastructure::config::SiteProfile;

/// Result of extracting one page of markup.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub reviews: Vec<Review>,
    /// Set in strict-text mode at the first empty comment: nothing past this
    /// point on this product is trustworthy, end the crawl.
    pub stop: bool,
}

pub struct ReviewExtractor {
    profile: SiteProfile,
    block_sel: Selector,
    avatar_sel: Selector,
    anchor_sel: Selector,
    gallery_sel: Selector,
    star_sel: Selector,
    date_re: Regex,
    helpful_re: Regex,
    vote_res: Vec<Regex>,
    banned_res: Vec<Regex>,
}

fn selector(source: &str) -> Result<Selector, CrawlError> {
    Selector::parse(source).map_err(|e| CrawlError::Profile(format!("selector {source:?}: {e}")))
}

fn pattern(source: &str) -> Result<Regex, CrawlError> {
    Regex::new(source).map_err(|e| CrawlError::Profile(format!("pattern {source:?}: {e}")))
}

impl ReviewExtractor {
    pub fn new(profile: &SiteProfile) -> Result<Self, CrawlError> {
        Ok(Self {
            block_sel: selector(&profile.review_block_selector)?,
            avatar_sel: selector(&profile.avatar_selector)?,
            anchor_sel: selector("a")?,
            gallery_sel: selector(&profile.gallery_selector)?,
            star_sel: selector(&profile.star_selector)?,
            date_re: pattern(&profile.date_pattern)?,
            helpful_re: pattern(&profile.helpful_prompt_pattern)?,
            vote_res: profile
                .vote_patterns
                .iter()
                .map(|p| pattern(p))
                .collect::<Result<_, _>>()?,
            banned_res: profile
                .banned_patterns
                .iter()
                .map(|p| pattern(p))
                .collect::<Result<_, _>>()?,
            profile: profile.clone(),
        })
    }

    /// Extract every review block from `markup` under the given mode policy.
    /// Deterministic: identical markup and mode always yield identical
    /// output.
    pub fn extract(&self, markup: &str, mode: ExtractionMode) -> Extraction {
        let document = Html::parse_fragment(markup);
        let blocks: Vec<ElementRef<'_>> = document.select(&self.block_sel).collect();
        debug!("found {} review blocks", blocks.len());

        let mut reviews = Vec::new();
        let mut stop = false;

        for (index, block) in blocks.into_iter().enumerate() {
            match self.extract_block(block, mode) {
                BlockOutcome::Review(review) => reviews.push(review),
                BlockOutcome::Skipped => {}
                BlockOutcome::Stop => {
                    debug!("empty comment at block #{index} in strict mode, stopping page");
                    stop = true;
                    break;
                }
            }
        }

        Extraction { reviews, stop }
    }

    fn extract_block(&self, block: ElementRef<'_>, mode: ExtractionMode) -> BlockOutcome {
        // 1. Flatten text-node leaves in document order; collect link texts.
        let mut texts: Vec<String> = block
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let has_avatar = block.select(&self.avatar_sel).next().is_some();

        let links: Vec<String> = block
            .select(&self.anchor_sel)
            .map(|a| a.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        // 2. Author name. With an avatar image the first leaf is the name.
        //    Without one, the site may render a single-character avatar
        //    initial duplicating the first letter of the name leaf - detect
        //    and discard it.
        let mut user = self.profile.unknown_label.clone();
        if !texts.is_empty() {
            if has_avatar {
                user = texts[0].clone();
            } else if texts.len() > 1
                && texts[0].chars().count() == 1
                && texts[1].chars().count() > 1
                && texts[1].starts_with(texts[0].as_str())
            {
                user = texts[1].clone();
                texts.remove(0);
            } else {
                user = texts[0].clone();
            }
        }

        // 3. Date: first leaf matching the month-name pattern.
        let date = texts
            .iter()
            .find(|t| self.date_re.is_match(t))
            .cloned()
            .unwrap_or_else(|| self.profile.unknown_label.clone());

        let product_variant = links
            .first()
            .cloned()
            .unwrap_or_else(|| self.profile.unknown_label.clone());

        // 4. Comment: leaves after the known name/date/link tokens, before
        //    the trailing "was this helpful?" prompt, minus vote labels and
        //    boilerplate.
        let mut known: HashSet<&str> = HashSet::new();
        known.insert(user.as_str());
        known.insert(date.as_str());
        for link in &links {
            known.insert(link.as_str());
        }

        let mut before_prompt = Vec::new();
        for text in &texts {
            if self.helpful_re.is_match(text) {
                break;
            }
            if known.contains(text.as_str()) {
                continue;
            }
            if self.vote_res.iter().any(|re| re.is_match(text)) {
                continue;
            }
            before_prompt.push(text.as_str());
        }

        let clean_parts: Vec<&str> = before_prompt
            .into_iter()
            .filter(|t| !t.is_empty() && !self.banned_res.iter().any(|re| re.is_match(t)))
            .collect();

        let mut comment = clean_parts.join(" ").trim().to_string();

        // Image-only review: substitute the sentinel.
        if comment.is_empty() && block.select(&self.gallery_sel).next().is_some() {
            comment = self.profile.image_only_sentinel.clone();
        }

        // 5. Strict-text: the first empty comment ends the whole page.
        if mode == ExtractionMode::StrictText && comment.is_empty() {
            return BlockOutcome::Stop;
        }

        // 6. Rating: the first star icon's style is the "filled" baseline;
        //    the rating is the run length of leading icons sharing it.
        let star_styles: Vec<String> = block
            .select(&self.star_sel)
            .take(5)
            .map(|el| el.value().attr("style").unwrap_or("").to_string())
            .collect();
        let rating = if star_styles.is_empty() {
            Rating::Unknown
        } else {
            let baseline = &star_styles[0];
            let mut value = 5u8;
            for (i, style) in star_styles.iter().enumerate().skip(1) {
                if style != baseline {
                    value = i as u8;
                    break;
                }
            }
            Rating::Stars(value)
        };

        // 7. Text-only: silently skip empty comments.
        if mode == ExtractionMode::TextOnly && comment.is_empty() {
            return BlockOutcome::Skipped;
        }

        let comment = if comment.is_empty() {
            self.profile.no_text_label.clone()
        } else {
            comment
        };

        BlockOutcome::Review(Review {
            user,
            product_variant,
            rating,
            comment,
            date,
            fingerprint: String::new(),
            source_url: String::new(),
            ordinal: String::new(),
        })
    }
}

enum BlockOutcome {
    Review(Review),
    Skipped,
    Stop,
}
