use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use wikisnap::sync::{SyncProgress, VotePageOutcome};

/// Per-outcome counts shown on the votes bar.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct VoteCounts {
    fetched: usize,
    unchanged: usize,
    empty: usize,
    restored: usize,
    failed: usize,
}

impl VoteCounts {
    fn record(&mut self, outcome: &VotePageOutcome) {
        match outcome {
            VotePageOutcome::Fetched { .. } => self.fetched += 1,
            VotePageOutcome::Unchanged => self.unchanged += 1,
            VotePageOutcome::Empty => self.empty += 1,
            VotePageOutcome::Restored => self.restored += 1,
            VotePageOutcome::Failed { .. } => self.failed += 1,
        }
    }

    fn message(&self) -> String {
        let mut msg = format!(
            "{} fetched, {} unchanged, {} empty",
            self.fetched, self.unchanged, self.empty
        );
        if self.restored > 0 {
            msg.push_str(&format!(", {} restored", self.restored));
        }
        if self.failed > 0 {
            msg.push_str(&format!(", {} failed", self.failed));
        }
        msg
    }
}

/// Consolidated progress state to avoid multiple mutex locks.
#[derive(Default)]
struct ProgressState {
    pages_bar: Option<ProgressBar>,
    votes_bar: Option<ProgressBar>,
    counts: VoteCounts,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match event {
            SyncProgress::Starting { mode, base_url } => {
                self.println(format!(
                    "{} {} sync of {}",
                    style("→").cyan().bold(),
                    mode,
                    style(base_url).bold()
                ));
            }

            SyncProgress::FetchingPages { resumed_with } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar.set_prefix(format!("{:8}", "pages"));
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_position(resumed_with as u64);
                bar.set_message(if resumed_with > 0 {
                    format!("Resuming listing ({resumed_with} known)...")
                } else {
                    "Fetching page listing...".to_string()
                });
                state.pages_bar = Some(bar);
            }

            SyncProgress::FetchedPages { total_so_far, .. } => {
                if let Some(ref bar) = state.pages_bar {
                    bar.set_position(total_so_far as u64);
                    bar.set_message(format!("{total_so_far} pages"));
                }
            }

            SyncProgress::PagesComplete { total } => {
                if let Some(ref bar) = state.pages_bar {
                    bar.finish_with_message(format!("{} {total} pages listed", style("✓").green()));
                }
            }

            SyncProgress::PagesRestored { total, source } => {
                self.println(format!(
                    "{} {total} pages from {source}",
                    style("✓").green()
                ));
            }

            SyncProgress::FetchingVotes {
                pages,
                already_completed,
            } => {
                let bar = self.multi.add(ProgressBar::new(pages as u64));
                bar.set_style(Self::bar_style());
                bar.set_prefix(format!("{:8}", "votes"));
                if already_completed > 0 {
                    bar.set_message(format!("{already_completed} already done"));
                }
                state.votes_bar = Some(bar);
            }

            SyncProgress::VotePageDone {
                url,
                outcome,
                processed,
                ..
            } => {
                if let VotePageOutcome::Failed { ref error } = outcome {
                    self.println(format!("{} {url}: {error}", style("⚠").yellow()));
                }
                state.counts.record(&outcome);
                let message = state.counts.message();
                if let Some(ref bar) = state.votes_bar {
                    bar.set_position(processed as u64);
                    bar.set_message(message);
                }
            }

            SyncProgress::VotesComplete { .. } => {
                if let Some(ref bar) = state.votes_bar {
                    bar.finish_with_message(state.counts.message());
                }
            }

            SyncProgress::RetryBackoff {
                subject,
                retry_after_ms,
                rate_limited,
                attempt,
                ..
            } => {
                let what = if rate_limited { "rate limited" } else { "request failed" };
                let msg = format!(
                    "{what}, retry {attempt} in {:.1}s ({subject})",
                    retry_after_ms as f64 / 1000.0
                );
                let bar = state.votes_bar.as_ref().or(state.pages_bar.as_ref());
                match bar {
                    Some(bar) if !bar.is_finished() => bar.set_message(msg),
                    _ => self.println(format!("{} {msg}", style("⚠").yellow())),
                }
            }

            SyncProgress::SnapshotWritten { path } => {
                self.println(format!(
                    "{} Snapshot written to {}",
                    style("✓").green().bold(),
                    path.display()
                ));
            }

            SyncProgress::Interrupted => {
                for bar in [&state.pages_bar, &state.votes_bar].into_iter().flatten() {
                    if !bar.is_finished() {
                        bar.abandon_with_message("interrupted");
                    }
                }
            }

            SyncProgress::Warning { message } => {
                self.println(format!("{} {message}", style("⚠").yellow()));
            }

            _ => {}
        }
    }

    /// Finish all progress bars.
    pub fn finish(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for bar in [&state.pages_bar, &state.votes_bar].into_iter().flatten() {
            if !bar.is_finished() {
                bar.finish();
            }
        }
    }

    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            eprintln!("{line}");
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_counts_message_hides_zero_tail() {
        let mut counts = VoteCounts::default();
        counts.record(&VotePageOutcome::Fetched {
            new_votes: 3,
            incremental: false,
        });
        counts.record(&VotePageOutcome::Unchanged);
        assert_eq!(counts.message(), "1 fetched, 1 unchanged, 0 empty");

        counts.record(&VotePageOutcome::Failed {
            error: "boom".to_string(),
        });
        assert_eq!(counts.message(), "1 fetched, 1 unchanged, 0 empty, 1 failed");
    }
}
