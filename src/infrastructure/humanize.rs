//! Humanized input simulation.
//!
//! Pointer drift, uneven scrolling, occasional key presses and idle pauses
//! between page interactions. Every helper is best-effort: an input failure
//! is logged and never escalates, the crawl continues.

use tracing::warn;

use crate::infrastructure::config::SiteProfile;
use crate::infrastructure::driver::BrowserSession;
use crate::infrastructure::logging::CaptureLog;
use crate::infrastructure::retry::sleep_jitter;

/// Drift the pointer somewhere plausible, sometimes nudging the wheel.
pub async fn human_mouse(session: &mut dyn BrowserSession) {
    let steps = 15 + fastrand::u32(..10);
    let x = 200.0 + fastrand::f64() * 1000.0;
    let y = 200.0 + fastrand::f64() * 600.0;

    if let Err(err) = session.move_pointer(x, y, steps).await {
        warn!("human_mouse: {err}");
        return;
    }
    sleep_jitter(200, 800).await;

    if fastrand::f64() < 0.25 {
        if let Err(err) = session.wheel(150.0 + fastrand::f64() * 350.0).await {
            warn!("human_mouse wheel: {err}");
        }
        sleep_jitter(300, 600).await;
    }
}

/// A few uneven wheel segments downward.
pub async fn human_scroll(session: &mut dyn BrowserSession) {
    let segments = 3 + fastrand::u32(..5);
    for _ in 0..segments {
        if let Err(err) = session.wheel(200.0 + fastrand::f64() * 400.0).await {
            warn!("human_scroll: {err}");
            return;
        }
        sleep_jitter(200, 600).await;
    }
}

/// Occasional arrow/page-down presses.
pub async fn human_keyboard(session: &mut dyn BrowserSession) {
    if fastrand::f64() < 0.2 {
        if let Err(err) = session.press_key("ArrowDown").await {
            warn!("human_keyboard: {err}");
            return;
        }
        sleep_jitter(200, 300).await;
    }
    if fastrand::f64() < 0.1 {
        if let Err(err) = session.press_key("PageDown").await {
            warn!("human_keyboard: {err}");
            return;
        }
        sleep_jitter(400, 500).await;
    }
}

/// Viewport-sized scroll steps that force lazy content to load.
pub async fn auto_scroll(session: &mut dyn BrowserSession, evaluate_timeout: std::time::Duration) {
    let steps = 5 + fastrand::u32(..10);
    for _ in 0..steps {
        let script = "window.scrollBy(0, window.innerHeight * (0.4 + Math.random() * 0.6));";
        if let Err(err) = session.evaluate(script, evaluate_timeout).await {
            warn!("auto_scroll: {err}");
            return;
        }
        sleep_jitter(200, 600).await;

        if fastrand::f64() < 0.2 {
            if let Err(err) = session.wheel(100.0 + fastrand::f64() * 300.0).await {
                warn!("auto_scroll wheel: {err}");
            }
        }
    }
}

/// Click every collapsed-text expander on the page so truncated comments are
/// fully rendered before extraction.
pub async fn expand_spoilers(
    session: &mut dyn BrowserSession,
    profile: &SiteProfile,
    evaluate_timeout: std::time::Duration,
    capture: &CaptureLog,
) {
    let script = format!(
        r#"(() => {{
  const spoilers = Array.from(document.querySelectorAll('span')).filter((el) =>
    el.innerText.trim().toLowerCase().includes('{label}')
  );
  spoilers.forEach((el) => el.click());
  return spoilers.length;
}})()"#,
        label = profile.spoiler_label
    );
    match session.evaluate(&script, evaluate_timeout).await {
        Ok(count) => capture.info(format!(
            "expanded {} collapsed comments",
            count.as_u64().unwrap_or(0)
        )),
        Err(err) => capture.warn(format!("spoiler expansion failed: {err}")),
    }
}
