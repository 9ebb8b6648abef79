//! Text rendering for scan and verify reports.
//!
//! Reports go to stdout. Warnings and the page spinner go to stderr so that
//! a redirected report stays clean.

use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use edgescan::scan::BatchProgress;
use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

pub struct Ui {
    paint: bool,
    quiet: bool,
}

impl Ui {
    pub fn new(color: ColorMode, quiet: bool) -> Self {
        let paint = match color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => !quiet && std::io::stdout().is_terminal(),
        };

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self { paint, quiet }
    }

    /// Right-aligned `key: value` rows under a heading, then a blank line.
    pub fn section<I, K, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        let rows: Vec<(String, String)> = rows
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);

        println!("{}", self.paint(Style::new().bold(), title));
        for (key, value) in rows {
            let key = format!("{key:>width$}:");
            println!("  {} {value}", self.paint(Color::Cyan.normal(), &key));
        }
        println!();
    }

    /// Bulleted entries under a heading. Prints nothing for no entries.
    pub fn list<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut entries = entries.into_iter().peekable();
        if entries.peek().is_none() {
            return;
        }
        println!("{}", self.paint(Style::new().bold(), title));
        for entry in entries {
            println!("  - {entry}");
        }
        println!();
    }

    /// Closing line of a report, green when the figures can be relied on
    /// and yellow otherwise.
    pub fn outcome(&self, trusted: bool, message: &str) {
        let (mark, color) = if trusted {
            ("ok", Color::Green)
        } else {
            ("!!", Color::Yellow)
        };
        println!("{} {message}", self.paint(color.bold(), mark));
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{} {message}", self.paint(Color::Yellow.bold(), "warning:"));
    }

    /// Spinner counting pages of one scan.
    pub fn scan_progress(&self, label: impl Into<String>) -> Progress {
        self.spinner("{spinner} {prefix} batch {pos} | {msg} ({elapsed})", label.into())
    }

    /// Spinner for a set of verification runs.
    pub fn verify_progress(&self, label: impl Into<String>) -> Progress {
        self.spinner("{spinner} {prefix} | {msg} ({elapsed})", label.into())
    }

    fn spinner(&self, template: &str, label: String) -> Progress {
        let bar = (!self.quiet).then(|| {
            let style = ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            let bar = ProgressBar::new_spinner().with_style(style);
            bar.set_prefix(label);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Progress {
            bar,
            start: Instant::now(),
            finished: false,
        }
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.paint {
            style.paint(text).to_string()
        } else {
            text.to_string()
        }
    }
}

pub struct Progress {
    bar: Option<ProgressBar>,
    start: Instant,
    finished: bool,
}

impl Progress {
    /// Shows the page just merged and the running edge count.
    pub fn batch(&self, progress: &BatchProgress) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(progress.batch));
            bar.set_message(format!(
                "{} edges, {} replayed",
                progress.unique_edges, progress.duplicates
            ));
        }
    }

    pub fn note(&self, message: String) {
        if let Some(bar) = &self.bar {
            bar.set_message(message);
        }
    }

    pub fn finish(mut self) -> Duration {
        self.finished = true;
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.start.elapsed()
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(bar) = self.bar.take() {
            let elapsed = format_duration(self.start.elapsed());
            bar.abandon_with_message(format!("interrupted after {elapsed}"));
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{:.0}ms", duration.as_secs_f64() * 1_000.0)
    }
}
