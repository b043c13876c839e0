//! Headless Chrome session and the live [`ListingPage`] built on it.

use crate::debug_eprintln;
use crate::debug_println;
use crate::harvester::ListingPage;
use crate::models::CardSnapshot;
use crate::pipeline::PageSource;
use crate::sites::{LoadMode, Site};
use anyhow::{anyhow, Context, Result};
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const USER_AGENT_ARG: &str = "--user-agent=Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One browser process with one tab, owned by a single stage.
///
/// The Chrome process is shut down when the session is dropped, so an early
/// return or a failed item never leaks a browser.
pub struct BrowserSession {
    // Field order matters: the tab must go before the browser that owns it.
    tab: Arc<Tab>,
    _browser: Browser,
    wait_timeout: Duration,
}

impl BrowserSession {
    pub fn launch(headless: bool) -> Result<Self> {
        let options = LaunchOptionsBuilder::default()
            .headless(headless)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(Duration::from_secs(300))
            .args(vec![
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--no-sandbox"),
                OsStr::new(USER_AGENT_ARG),
            ])
            .build()
            .map_err(|e| anyhow!("Invalid browser launch options: {}", e))?;

        let browser = Browser::new(options).context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;
        tab.set_default_timeout(Duration::from_secs(30));

        // Hide the automation flag some shops check before rendering results
        tab.evaluate(
            "Object.defineProperty(navigator, 'webdriver', { get: () => false });",
            false,
        )
        .ok();

        Ok(Self {
            tab,
            _browser: browser,
            wait_timeout: Duration::from_secs(12),
        })
    }

    pub fn open(&self, url: &str) -> Result<()> {
        debug_println!("Navigating to {}", url);
        self.tab
            .navigate_to(url)
            .with_context(|| format!("Failed to navigate to {}", url))?;
        self.tab
            .wait_until_navigated()
            .with_context(|| format!("Page did not finish loading: {}", url))?;
        Ok(())
    }

    /// Waits up to the session's wait timeout for `css` to appear.
    ///
    /// Best-effort: returns whether it appeared, never fails.
    pub fn wait_for(&self, css: &str) -> bool {
        match self.tab.wait_for_element_with_custom_timeout(css, self.wait_timeout) {
            Ok(_) => true,
            Err(e) => {
                debug_eprintln!("Gave up waiting for {:?}: {}", css, e);
                false
            }
        }
    }

    pub fn content(&self) -> Result<String> {
        self.tab.get_content().context("Failed to read page content")
    }

    pub fn current_url(&self) -> String {
        self.tab.get_url()
    }

    /// Runs a script and returns its JSON value (`Null` when it returns nothing).
    pub fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .context("Script evaluation failed")?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    pub fn scroll_to_bottom(&self) -> Result<()> {
        self.evaluate("window.scrollTo(0, document.body.scrollHeight); true")?;
        Ok(())
    }

    /// Number of elements matching `css` in the live DOM.
    pub fn count(&self, css: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(css)?
        );
        let value = self.evaluate(&script)?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| anyhow!("Unexpected element count: {}", value))
    }

    /// Outer HTML of every element matching `css`. A card that cannot be
    /// serialized comes back as an error in its slot.
    pub fn outer_html_all(&self, css: &str) -> Result<Vec<Result<String>>> {
        let script = format!(
            r#"JSON.stringify(Array.from(document.querySelectorAll({})).map(el => {{
                try {{ return el.outerHTML; }} catch (e) {{ return null; }}
            }}))"#,
            serde_json::to_string(css)?
        );
        let value = self.evaluate(&script)?;
        let json = value
            .as_str()
            .ok_or_else(|| anyhow!("Card snapshot script returned {}", value))?;
        let slots: Vec<Option<String>> =
            serde_json::from_str(json).context("Failed to decode card snapshots")?;

        Ok(slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or_else(|| anyhow!("Card {} could not be serialized", i + 1)))
            .collect())
    }
}

/// Product pages render their gallery and specification table late, so the
/// page is scrolled once before the markup is read.
impl PageSource for BrowserSession {
    fn page_html(&self, url: &str) -> Result<String> {
        self.open(url)?;
        self.wait_for("body");
        debug_println!("Landed on {}", self.current_url());
        self.scroll_to_bottom().ok();
        thread::sleep(Duration::from_millis(1500));
        self.content()
    }
}

/// Cards gathered across result pages.
///
/// A page can be snapshotted more than once (when counted and again when
/// read); cards are kept once and failures are remembered per page, so a
/// failing card is reported once however often its page is read.
#[derive(Debug, Default)]
struct PageCollector {
    cards: Vec<String>,
    seen: HashSet<String>,
    failures: BTreeMap<u32, Vec<String>>,
}

impl PageCollector {
    fn record_page(&mut self, page: u32, cards: Vec<Result<String>>) {
        let mut failures = Vec::new();
        for card in cards {
            match card {
                Ok(html) => {
                    if self.seen.insert(html.clone()) {
                        self.cards.push(html);
                    }
                }
                Err(e) => {
                    debug_eprintln!("Page {}: {}", page, e);
                    failures.push(format!("page {}: {:#}", page, e));
                }
            }
        }
        self.failures.insert(page, failures);
    }

    fn len(&self) -> usize {
        self.cards.len()
    }

    fn snapshots(&self) -> Vec<Result<CardSnapshot>> {
        self.cards
            .iter()
            .map(|html| Ok(CardSnapshot::new(html.as_str())))
            .chain(
                self.failures
                    .values()
                    .flatten()
                    .map(|message| Err(anyhow!("Card could not be read on {}", message))),
            )
            .collect()
    }
}

/// A site's search results in a live browser tab.
///
/// In pagination mode every visited page is snapshotted as it is counted, so
/// the count grows across pages the same way it grows across scrolls.
pub struct ChromeListingPage<'a> {
    session: &'a BrowserSession,
    site: Site,
    query: String,
    page: u32,
    collected: PageCollector,
}

impl<'a> ChromeListingPage<'a> {
    /// Opens the first result page and waits for cards to render.
    pub fn open(session: &'a BrowserSession, site: Site, query: &str) -> Result<Self> {
        let url = site.search_url(query);
        session.open(&url)?;
        if !session.wait_for(site.card_selector()) {
            println!("⚠️  No product cards appeared on {} yet, continuing", url);
        }
        Ok(Self {
            session,
            site,
            query: query.to_string(),
            page: 1,
            collected: PageCollector::default(),
        })
    }

    fn snapshot_current_page(&mut self) -> Result<()> {
        let cards = self.session.outer_html_all(self.site.card_selector())?;
        self.collected.record_page(self.page, cards);
        Ok(())
    }
}

impl ListingPage for ChromeListingPage<'_> {
    fn card_count(&mut self) -> Result<usize> {
        match self.site.load_mode() {
            LoadMode::Scroll => self.session.count(self.site.card_selector()),
            LoadMode::Paginate { .. } => {
                self.snapshot_current_page()?;
                Ok(self.collected.len())
            }
        }
    }

    fn load_more(&mut self) -> Result<()> {
        match self.site.load_mode() {
            LoadMode::Scroll => self.session.scroll_to_bottom(),
            LoadMode::Paginate { max_pages } => {
                if self.page >= max_pages {
                    return Ok(());
                }
                self.page += 1;
                let url = self.site.page_url(&self.query, self.page);
                self.session.open(&url)?;
                self.session.wait_for(self.site.card_selector());
                // Lazy images and prices render after the first paint
                self.session.scroll_to_bottom()?;
                thread::sleep(Duration::from_millis(500));
                Ok(())
            }
        }
    }

    fn read_cards(&mut self) -> Result<Vec<Result<CardSnapshot>>> {
        match self.site.load_mode() {
            LoadMode::Scroll => Ok(self
                .session
                .outer_html_all(self.site.card_selector())?
                .into_iter()
                .map(|card| card.map(CardSnapshot::new))
                .collect()),
            LoadMode::Paginate { .. } => {
                self.snapshot_current_page()?;
                Ok(self.collected.snapshots())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_failures_are_counted_once_per_page() {
        let mut collector = PageCollector::default();
        let page_one = || vec![Ok("<div data-id='a'></div>".to_string()), Err(anyhow!("detached node"))];
        collector.record_page(1, page_one());
        // the same page read again when the harvest ends
        collector.record_page(1, page_one());
        collector.record_page(2, vec![Ok("<div data-id='b'></div>".to_string()), Ok("<div data-id='a'></div>".to_string())]);

        assert_eq!(collector.len(), 2);
        let snapshots = collector.snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots.iter().filter(|s| s.is_err()).count(), 1);
        assert_eq!(snapshots[1].as_ref().unwrap().html, "<div data-id='b'></div>");
    }
}
