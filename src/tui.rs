use crate::models::StageSummary;
use crossterm::{
    cursor::MoveToPreviousLine,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;

/// Coloured status lines for one pipeline stage.
pub struct StageTUI {
    stage: String,
    round_line_printed: bool,
}

impl StageTUI {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            round_line_printed: false,
        }
    }

    pub fn header(&self, detail: &str) -> io::Result<()> {
        let title = format!("{} - {}", self.stage, detail);
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Cyan),
            Print(format!("{}\n{}\n", title, "=".repeat(title.chars().count()))),
            ResetColor
        )
    }

    /// Grey line about inputs picked up from an earlier run or stage.
    pub fn loaded(&self, count: usize, what: &str) -> io::Result<()> {
        execute!(
            io::stdout(),
            SetForegroundColor(Color::DarkGrey),
            Print(format!("📁 Loaded {} {}\n", count, what)),
            ResetColor
        )
    }

    /// Rewrites a single line in place with the harvest round status.
    pub fn harvest_round(&mut self, round: u32, cards: usize, no_growth: u32, max_no_growth: u32) -> io::Result<()> {
        if self.round_line_printed {
            execute!(io::stdout(), MoveToPreviousLine(1), Clear(ClearType::CurrentLine))?;
        }
        let spinner = match round % 4 {
            0 => "⠋",
            1 => "⠙",
            2 => "⠹",
            _ => "⠸",
        };
        execute!(
            io::stdout(),
            SetForegroundColor(Color::White),
            Print(format!(
                "{} Loading listing: round {} - {} cards ({}/{} rounds without growth)\n",
                spinner, round, cards, no_growth, max_no_growth
            )),
            ResetColor
        )?;
        self.round_line_printed = true;
        Ok(())
    }

    pub fn finish_harvest(&mut self, cards: usize, rounds: u32) -> io::Result<()> {
        if self.round_line_printed {
            execute!(io::stdout(), MoveToPreviousLine(1), Clear(ClearType::CurrentLine))?;
            self.round_line_printed = false;
        }
        execute!(
            io::stdout(),
            SetForegroundColor(Color::DarkGrey),
            Print(format!("✓ Collected {} cards in {} rounds\n", cards, rounds)),
            ResetColor
        )
    }

    pub fn item_started(&self, position: usize, total: usize, label: &str) -> io::Result<()> {
        execute!(
            io::stdout(),
            SetForegroundColor(Color::White),
            Print(format!("🔄 [{}/{}] {}\n", position, total, truncate(label, 80))),
            ResetColor
        )
    }

    pub fn item_done(&self, detail: &str) -> io::Result<()> {
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Green),
            Print(format!("  ✅ {}\n", detail)),
            ResetColor
        )
    }

    pub fn item_failed(&self, detail: &str) -> io::Result<()> {
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Red),
            Print(format!("  ❌ {}\n", detail)),
            ResetColor
        )
    }

    pub fn warn(&self, message: &str) -> io::Result<()> {
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Yellow),
            Print(format!("⚠️  {}\n", message)),
            ResetColor
        )
    }

    pub fn final_summary(&self, summary: &StageSummary) -> io::Result<()> {
        execute!(
            io::stdout(),
            Print("─".repeat(80)),
            Print("\n"),
            SetForegroundColor(Color::Green),
            Print(format!("✅ {} completed: {} successful", self.stage, summary.succeeded)),
            ResetColor
        )?;
        if summary.failed > 0 {
            execute!(
                io::stdout(),
                SetForegroundColor(Color::Red),
                Print(format!(", {} failed", summary.failed)),
                ResetColor
            )?;
        }
        execute!(
            io::stdout(),
            SetForegroundColor(Color::DarkGrey),
            Print(format!(" | {} skipped\n", summary.skipped)),
            ResetColor
        )
    }
}

/// Progress bar for long per-item loops (downloads, vision calls).
pub fn progress_bar(len: u64, what: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░ ");
    bar.set_style(style);
    bar.set_message(what.to_string());
    bar
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
