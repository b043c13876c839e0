//! Scroll-until-stable collection of product cards.
//!
//! The harvester keeps asking the page for more content and re-counting the
//! cards until the count stops growing for a number of consecutive rounds,
//! or the round budget runs out, or the run is cancelled. It never assumes a
//! total.

use crate::cancel::CancelToken;
use crate::models::CardSnapshot;
use crate::debug_eprintln;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Duration;

/// A listing that can reveal more cards on demand.
pub trait ListingPage {
    /// Number of cards currently present.
    fn card_count(&mut self) -> Result<usize>;
    /// Scroll to the bottom or follow pagination.
    fn load_more(&mut self) -> Result<()>;
    /// Snapshot every card. A failing card does not fail the whole read.
    fn read_cards(&mut self) -> Result<Vec<Result<CardSnapshot>>>;
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Time for asynchronously loaded content to render after each round.
    pub min_wait_between_rounds: Duration,
    pub max_no_growth_rounds: u32,
    /// Hard cap on rounds for feeds that never stabilize.
    pub max_rounds: u32,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            min_wait_between_rounds: Duration::from_millis(1200),
            max_no_growth_rounds: 3,
            max_rounds: 60,
        }
    }
}

/// State carried across rounds of a single listing scrape.
#[derive(Debug, Default)]
pub struct HarvestSession {
    /// Highest card count observed.
    pub last_item_count: usize,
    pub no_growth_rounds: u32,
    pub rounds: u32,
    /// Markup of cards already emitted; pagination can surface a card twice.
    seen_cards: HashSet<String>,
}

impl HarvestSession {
    /// Records a new count and returns whether it grew past the highest
    /// count seen so far. A shrinking count is not growth.
    fn observe(&mut self, count: usize) -> bool {
        self.rounds += 1;
        let grew = count > self.last_item_count;
        if grew {
            self.no_growth_rounds = 0;
            self.last_item_count = count;
        } else {
            self.no_growth_rounds += 1;
        }
        grew
    }

    fn first_sighting(&mut self, card: &CardSnapshot) -> bool {
        self.seen_cards.insert(card.html.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stable,
    RoundBudget,
    Cancelled,
}

#[derive(Debug)]
pub struct HarvestOutcome {
    pub cards: Vec<CardSnapshot>,
    pub rounds: u32,
    pub no_growth_rounds: u32,
    pub unreadable: usize,
    pub stop: StopReason,
}

/// Loads the listing until stable and returns the card snapshots in page order.
///
/// `on_round` is called after every count, for progress display.
pub fn harvest<P, F>(
    page: &mut P,
    options: &HarvestOptions,
    cancel: &CancelToken,
    mut on_round: F,
) -> Result<HarvestOutcome>
where
    P: ListingPage + ?Sized,
    F: FnMut(&HarvestSession),
{
    let mut session = HarvestSession::default();
    let max_no_growth = options.max_no_growth_rounds.max(1);

    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }

        let count = match page.card_count() {
            Ok(count) => count,
            Err(e) => {
                debug_eprintln!("Counting cards failed in round {}: {}", session.rounds + 1, e);
                session.last_item_count
            }
        };
        session.observe(count);
        on_round(&session);

        if session.no_growth_rounds >= max_no_growth {
            break StopReason::Stable;
        }
        if session.rounds >= options.max_rounds {
            break StopReason::RoundBudget;
        }

        if let Err(e) = page.load_more() {
            debug_eprintln!("Loading more cards failed in round {}: {}", session.rounds, e);
        }
        if !cancel.sleep(options.min_wait_between_rounds) {
            break StopReason::Cancelled;
        }
    };

    let mut cards = Vec::new();
    let mut unreadable = 0;
    for read in page.read_cards().context("Failed to read product cards")? {
        match read {
            Ok(card) => {
                if session.first_sighting(&card) {
                    cards.push(card);
                }
            }
            Err(e) => {
                debug_eprintln!("Skipping unreadable card: {}", e);
                unreadable += 1;
            }
        }
    }

    Ok(HarvestOutcome {
        cards,
        rounds: session.rounds,
        no_growth_rounds: session.no_growth_rounds,
        unreadable,
        stop,
    })
}
