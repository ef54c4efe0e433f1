//! Pagination engine behavior against a scripted browser session: dedup
//! short-circuit, strict-text early stop, monotonic page advancement, page
//! limits and probe retry exhaustion.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{page_html, review_block, test_config, PageDef, ScriptedDriver, TestProgress};
use review_harvester::domain::error::CrawlError;
use review_harvester::domain::job::ExtractionMode;
use review_harvester::domain::product_url;
use review_harvester::infrastructure::driver::BrowserDriver;
use review_harvester::infrastructure::extractor::ReviewExtractor;
use review_harvester::infrastructure::logging::CaptureLog;
use review_harvester::infrastructure::pagination::{PaginationEngine, ProductCrawl};

const ALPHA: &str = "https://www.ozon.ru/product/alpha-1/";

fn engine(config: review_harvester::CrawlerConfig) -> PaginationEngine {
    let config = Arc::new(config);
    let extractor = Arc::new(ReviewExtractor::new(&config.site).unwrap());
    PaginationEngine::new(config, extractor).unwrap()
}

/// Probe + two review pages for one product, ending naturally.
fn two_page_site(url: &str) -> HashMap<String, PageDef> {
    let probe_url = product_url::reviews_url_with_sort(url, "score_asc").unwrap();
    let main_url = product_url::reviews_url(url);
    let page2_url = format!("{main_url}?page=2");

    let probe_html = page_html(&[
        review_block("Анна", "Отличный товар.", 5),
        review_block("Борис", "Неплохо.", 4),
    ]);
    let page1_html = page_html(&[
        review_block("Анна", "Отличный товар.", 5),
        review_block("Борис", "Неплохо.", 4),
    ]);
    let page2_html = page_html(&[review_block("Вера", "Пойдёт.", 3)]);

    HashMap::from([
        (probe_url, PageDef::reviews(probe_html)),
        (
            main_url,
            PageDef::reviews(page1_html)
                .with_title("Товар — 3 отзыва покупателей")
                .with_next(&page2_url),
        ),
        (page2_url.clone(), PageDef::reviews(page2_html)),
    ])
}

async fn crawl(
    driver: &ScriptedDriver,
    engine: &PaginationEngine,
    url: &str,
    mode: ExtractionMode,
    progress: &TestProgress,
) -> Result<ProductCrawl, CrawlError> {
    let mut session = driver
        .open_session(Default::default())
        .await
        .expect("session");
    engine
        .crawl_product(
            session.as_mut(),
            url,
            mode,
            progress,
            &CancellationToken::new(),
            &CaptureLog::new(),
        )
        .await
}

#[tokio::test(start_paused = true)]
async fn full_crawl_collects_all_pages_in_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let driver = ScriptedDriver::new(two_page_site(ALPHA));
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();

    let result = crawl(&driver, &engine, ALPHA, ExtractionMode::StrictText, &progress)
        .await
        .unwrap();

    match result {
        ProductCrawl::Complete {
            total_count,
            reviews,
            fingerprint,
        } => {
            assert_eq!(total_count, 3, "site-reported total from the title");
            assert_eq!(reviews.len(), 3);
            assert_eq!(reviews[0].user, "Анна");
            assert_eq!(reviews[2].user, "Вера");
            assert!(!fingerprint.is_empty());
            assert!(reviews.iter().all(|r| r.fingerprint == fingerprint));
        }
        other => panic!("expected complete crawl, got {other:?}"),
    }

    assert_eq!(*progress.pages.lock().unwrap(), vec![1, 2]);
    assert_eq!(
        progress.collected.load(std::sync::atomic::Ordering::SeqCst),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_fingerprint_short_circuits_before_main_load() {
    let dir = tempfile::TempDir::new().unwrap();
    let beta = "https://www.ozon.ru/product/alpha-1-blue/";

    let mut pages = two_page_site(ALPHA);
    // Beta renders the identical review sample on its probe page.
    let beta_probe = product_url::reviews_url_with_sort(beta, "score_asc").unwrap();
    let alpha_probe = product_url::reviews_url_with_sort(ALPHA, "score_asc").unwrap();
    let alpha_probe_page = pages[&alpha_probe].clone();
    pages.insert(beta_probe, alpha_probe_page);

    let driver = ScriptedDriver::new(pages);
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();

    let first = crawl(&driver, &engine, ALPHA, ExtractionMode::StrictText, &progress)
        .await
        .unwrap();
    let ProductCrawl::Complete { fingerprint, .. } = first else {
        panic!("first product should crawl fully");
    };

    let second = crawl(&driver, &engine, beta, ExtractionMode::StrictText, &progress)
        .await
        .unwrap();
    match second {
        ProductCrawl::Duplicate {
            fingerprint: dup_hash,
            duplicate_of,
        } => {
            assert_eq!(dup_hash, fingerprint);
            assert_eq!(duplicate_of, ALPHA);
        }
        other => panic!("expected duplicate, got {other:?}"),
    }

    // The duplicate never entered MainLoad.
    let beta_main = product_url::reviews_url(beta);
    assert!(
        !driver.nav_log().contains(&beta_main),
        "duplicate product must not load its main review page"
    );
}

#[tokio::test(start_paused = true)]
async fn strict_text_stop_on_page_two_fetches_no_further_pages() {
    let dir = tempfile::TempDir::new().unwrap();
    let probe_url = product_url::reviews_url_with_sort(ALPHA, "score_asc").unwrap();
    let main_url = product_url::reviews_url(ALPHA);
    let page2 = format!("{main_url}?page=2");
    let page3 = format!("{main_url}?page=3");

    // Page 2: empty comment at position 3 of 5.
    let page2_html = page_html(&[
        review_block("Вера", "Хорошо.", 4),
        review_block("Глеб", "Отлично.", 5),
        review_block("Дарья", "", 2),
        review_block("Егор", "Нормально.", 3),
        review_block("Жанна", "Супер.", 5),
    ]);

    let pages = HashMap::from([
        (
            probe_url,
            PageDef::reviews(page_html(&[review_block("Анна", "Да.", 5)])),
        ),
        (
            main_url.clone(),
            PageDef::reviews(page_html(&[
                review_block("Анна", "Да.", 5),
                review_block("Борис", "Нет.", 1),
            ]))
            .with_next(&page2),
        ),
        (page2.clone(), PageDef::reviews(page2_html).with_next(&page3)),
        (
            page3.clone(),
            PageDef::reviews(page_html(&[review_block("Зоя", "Ок.", 4)])),
        ),
    ]);

    let driver = ScriptedDriver::new(pages);
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();

    let result = crawl(&driver, &engine, ALPHA, ExtractionMode::StrictText, &progress)
        .await
        .unwrap();

    let ProductCrawl::Complete { reviews, .. } = result else {
        panic!("expected complete crawl");
    };
    // Page 1 fully + only the first 2 reviews of page 2.
    assert_eq!(reviews.len(), 4);
    assert_eq!(reviews[3].user, "Глеб");
    assert!(
        !driver.nav_log().contains(&page3),
        "no pages may be fetched past the strict-text stop"
    );
}

#[tokio::test(start_paused = true)]
async fn next_control_skipping_pages_is_fatal_for_the_product() {
    let dir = tempfile::TempDir::new().unwrap();
    let probe_url = product_url::reviews_url_with_sort(ALPHA, "score_asc").unwrap();
    let main_url = product_url::reviews_url(ALPHA);

    let pages = HashMap::from([
        (
            probe_url,
            PageDef::reviews(page_html(&[review_block("Анна", "Да.", 5)])),
        ),
        (
            main_url.clone(),
            // Control claims page 5 while we are on page 1.
            PageDef::reviews(page_html(&[review_block("Анна", "Да.", 5)]))
                .with_next(&format!("{main_url}?page=5")),
        ),
    ]);

    let driver = ScriptedDriver::new(pages);
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();

    let err = crawl(&driver, &engine, ALPHA, ExtractionMode::All, &progress)
        .await
        .unwrap_err();
    match err {
        CrawlError::PaginationSkip { expected, actual } => {
            assert_eq!(expected, 2);
            assert_eq!(actual, 5);
        }
        other => panic!("expected pagination skip, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn next_control_pointing_at_current_page_is_a_loop_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let probe_url = product_url::reviews_url_with_sort(ALPHA, "score_asc").unwrap();
    let main_url = product_url::reviews_url(ALPHA);

    let pages = HashMap::from([
        (
            probe_url,
            PageDef::reviews(page_html(&[review_block("Анна", "Да.", 5)])),
        ),
        (
            main_url.clone(),
            PageDef::reviews(page_html(&[review_block("Анна", "Да.", 5)]))
                .with_next(&main_url),
        ),
    ]);

    let driver = ScriptedDriver::new(pages);
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();

    let err = crawl(&driver, &engine, ALPHA, ExtractionMode::All, &progress)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::PaginationLoop { page: 1 }));
}

#[tokio::test(start_paused = true)]
async fn page_limit_caps_runaway_sessions() {
    let dir = tempfile::TempDir::new().unwrap();
    let probe_url = product_url::reviews_url_with_sort(ALPHA, "score_asc").unwrap();
    let main_url = product_url::reviews_url(ALPHA);

    // An endless chain of pages; the guard must stop at the limit.
    let mut pages = HashMap::from([(
        probe_url,
        PageDef::reviews(page_html(&[review_block("Анна", "Да.", 5)])),
    )]);
    for n in 1..=5u32 {
        let url = if n == 1 {
            main_url.clone()
        } else {
            format!("{main_url}?page={n}")
        };
        let next = format!("{main_url}?page={}", n + 1);
        pages.insert(
            url,
            PageDef::reviews(page_html(&[review_block(&format!("П{n}"), "Ок.", 4)]))
                .with_next(&next),
        );
    }

    let mut config = test_config(dir.path());
    config.max_pages_per_product = 2;

    let driver = ScriptedDriver::new(pages);
    let engine = engine(config);
    let progress = TestProgress::default();

    let result = crawl(&driver, &engine, ALPHA, ExtractionMode::All, &progress)
        .await
        .unwrap();
    let ProductCrawl::Complete { reviews, .. } = result else {
        panic!("expected complete crawl");
    };
    assert_eq!(reviews.len(), 2, "pages past the limit are not extracted");
}

#[tokio::test(start_paused = true)]
async fn probe_challenge_exhausts_retries_into_fingerprint_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let probe_url = product_url::reviews_url_with_sort(ALPHA, "score_asc").unwrap();

    let pages = HashMap::from([(
        probe_url.clone(),
        PageDef::challenge("https://www.ozon.ru/antibot/challenge"),
    )]);

    let driver = ScriptedDriver::new(pages);
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();

    let err = crawl(&driver, &engine, ALPHA, ExtractionMode::All, &progress)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::FingerprintUnavailable { .. }));

    // All three probe attempts navigated.
    let probes = driver
        .nav_log()
        .iter()
        .filter(|u| *u == &probe_url)
        .count();
    assert_eq!(probes, 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_first_page_yields_empty_complete() {
    let dir = tempfile::TempDir::new().unwrap();
    let driver = ScriptedDriver::new(two_page_site(ALPHA));
    let engine = engine(test_config(dir.path()));
    let progress = TestProgress::default();
    progress
        .cancel
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = crawl(&driver, &engine, ALPHA, ExtractionMode::StrictText, &progress)
        .await
        .unwrap();
    let ProductCrawl::Complete { reviews, .. } = result else {
        panic!("cancellation is not an error");
    };
    assert!(reviews.is_empty());
}
