//! Headless-browser capability used by the careers-portal adapter, plus the WebDriver
//! implementation and the bounded auto-scroll loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thirtyfour::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("could not start browser session: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
}

/// One live page. Scripts follow WebDriver semantics: the body `return`s its value and
/// receives `args` as `arguments`.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait until `selector` matches at least one element. `Ok(false)` on timeout.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, BrowserError>;

    async fn evaluate(
        &mut self,
        script: &str,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

const CHROME_ARGS: [&str; 6] = [
    "--headless=new",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
    "--disable-blink-features=AutomationControlled",
];

const COUNT_SCRIPT: &str = "return document.querySelectorAll(arguments[0]).length;";

/// Opens Chrome sessions through a running chromedriver.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    webdriver_url: String,
    poll_interval: Duration,
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_option("args", CHROME_ARGS.to_vec())
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let driver = WebDriver::new(self.webdriver_url.as_str(), caps)
            .await
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", self.webdriver_url)))?;
        Ok(Box::new(WebDriverSession {
            driver: Some(driver),
            poll_interval: self.poll_interval,
        }))
    }
}

struct WebDriverSession {
    driver: Option<WebDriver>,
    poll_interval: Duration,
}

impl WebDriverSession {
    fn driver(&self) -> Result<&WebDriver, BrowserError> {
        self.driver
            .as_ref()
            .ok_or_else(|| BrowserError::Navigation("session already closed".to_string()))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.driver()?
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("{url}: {e}")))
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let count = self.evaluate(COUNT_SCRIPT, vec![json!(selector)]).await?;
            if count.as_u64().unwrap_or(0) > 0 {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn evaluate(
        &mut self,
        script: &str,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, BrowserError> {
        let ret = self
            .driver()?
            .execute(script, args)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(ret.json().clone())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        match self.driver.take() {
            Some(driver) => driver
                .quit()
                .await
                .map_err(|e| BrowserError::Navigation(format!("quit: {e}"))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoScrollConfig {
    pub increment_px: u64,
    pub poll_interval_ms: u64,
    /// Hard stop for feeds that never stop growing.
    pub max_distance_px: u64,
}

impl Default for AutoScrollConfig {
    fn default() -> Self {
        Self {
            increment_px: 500,
            poll_interval_ms: 300,
            max_distance_px: 50_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStop {
    HeightStable,
    DistanceLimit,
    ContainerMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollStats {
    pub polls: u32,
    pub scrolled_px: u64,
    pub last_height: Option<u64>,
    pub stop: ScrollStop,
}

const SCROLL_SCRIPT: &str = r#"
const list = document.querySelector(arguments[0]);
if (!list) { return null; }
list.scrollBy(0, arguments[1]);
return list.scrollHeight;
"#;

/// Scroll `container` until its height stops changing between two consecutive polls or
/// the cumulative distance reaches `max_distance_px`.
pub async fn auto_scroll(
    session: &mut dyn BrowserSession,
    container: &str,
    config: &AutoScrollConfig,
) -> Result<ScrollStats, BrowserError> {
    let increment = config.increment_px.max(1);
    let mut stats = ScrollStats {
        polls: 0,
        scrolled_px: 0,
        last_height: None,
        stop: ScrollStop::DistanceLimit,
    };

    while stats.scrolled_px < config.max_distance_px {
        let height = session
            .evaluate(SCROLL_SCRIPT, vec![json!(container), json!(increment)])
            .await?;
        stats.polls += 1;
        stats.scrolled_px += increment;

        let Some(height) = height.as_u64() else {
            stats.stop = ScrollStop::ContainerMissing;
            return Ok(stats);
        };
        if stats.last_height == Some(height) {
            stats.stop = ScrollStop::HeightStable;
            return Ok(stats);
        }
        stats.last_height = Some(height);
        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }

    stats.stop = ScrollStop::DistanceLimit;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of container heights; repeats the last one forever
    /// unless `growing` is set, in which case every poll adds 500px.
    struct HeightSession {
        heights: VecDeque<u64>,
        growing: Option<u64>,
        evaluations: u32,
    }

    #[async_trait]
    impl BrowserSession for HeightSession {
        async fn navigate(&mut self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn wait_for(&mut self, _s: &str, _t: Duration) -> Result<bool, BrowserError> {
            Ok(true)
        }

        async fn evaluate(
            &mut self,
            _script: &str,
            _args: Vec<JsonValue>,
        ) -> Result<JsonValue, BrowserError> {
            self.evaluations += 1;
            if let Some(h) = self.growing.as_mut() {
                *h += 500;
                return Ok(json!(*h));
            }
            let next = if self.heights.len() > 1 {
                self.heights.pop_front()
            } else {
                self.heights.front().copied()
            };
            Ok(next.map(|h| json!(h)).unwrap_or(JsonValue::Null))
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn fast(max_distance_px: u64) -> AutoScrollConfig {
        AutoScrollConfig {
            increment_px: 500,
            poll_interval_ms: 0,
            max_distance_px,
        }
    }

    #[tokio::test]
    async fn stops_when_height_repeats_on_consecutive_polls() {
        let mut session = HeightSession {
            heights: VecDeque::from([1000, 1500, 2000, 2000, 2600]),
            growing: None,
            evaluations: 0,
        };
        let stats = auto_scroll(&mut session, "gc-job-list", &fast(50_000)).await.unwrap();
        assert_eq!(stats.stop, ScrollStop::HeightStable);
        assert_eq!(stats.polls, 4);
        assert_eq!(stats.last_height, Some(2000));
        assert_eq!(session.evaluations, 4);
    }

    #[tokio::test]
    async fn distance_guard_stops_an_endless_feed() {
        let mut session = HeightSession {
            heights: VecDeque::new(),
            growing: Some(0),
            evaluations: 0,
        };
        let stats = auto_scroll(&mut session, "gc-job-list", &fast(5_000)).await.unwrap();
        assert_eq!(stats.stop, ScrollStop::DistanceLimit);
        assert_eq!(stats.polls, 10);
        assert_eq!(stats.scrolled_px, 5_000);
    }

    #[tokio::test]
    async fn missing_container_ends_scrolling_immediately() {
        let mut session = HeightSession {
            heights: VecDeque::new(),
            growing: None,
            evaluations: 0,
        };
        let stats = auto_scroll(&mut session, "gc-job-list", &fast(5_000)).await.unwrap();
        assert_eq!(stats.stop, ScrollStop::ContainerMissing);
        assert_eq!(stats.polls, 1);
    }
}
