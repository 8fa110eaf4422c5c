#![forbid(unsafe_code)]

//! Plain full-screen frame on a terminal.
//!
//! Each render call updates one part of the frame (status, summary or tail)
//! and redraws the whole screen:
//!
//! ```text
//! tailmon  filter: all  live #1
//!
//! TAGS                    PRIORITIES              HOSTS
//! sshd                 12 err                   4 mx1                   9
//! ...
//!
//!      #  MESSAGE
//!      3  Failed password for root from 10.0.0.7 port 51234
//!      1  session opened for user alice
//! ```
//!
//! With a [`Selection`] attached, the summary row under the keyboard cursor is
//! marked with `>` and the drawn rows are published back to the cursor.
//!
//! Highlighted tail rows are drawn in red. Text is cut to the terminal width
//! on grapheme boundaries using display width, never in the middle of a
//! wide character.

use std::io::{self, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use tailmon_core::{Group, SummaryViews, TailEntry};
use tailmon_runtime::{RenderSink, Status, SummaryLine, TailRow};

use crate::input::{self, SharedSelection};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// Rows shown per summary column.
pub const SUMMARY_ROWS: usize = 5;

/// Width of the right-aligned `#` column.
pub const COUNT_WIDTH: usize = 6;

const ELLIPSIS: &str = "\u{2026}";
const CURSOR: &str = ">";
const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// One line of a composed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLine {
    pub text: String,
    pub highlighted: bool,
}

impl FrameLine {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            highlighted: false,
        }
    }
}

/// Renders monitor frames to a terminal (or any writer).
pub struct TerminalSink<W: Write> {
    out: W,
    size: (u16, u16),
    track_size: bool,
    alternate: bool,
    status: Option<Status>,
    summary: [Vec<SummaryLine>; 3],
    tail: Vec<TailRow>,
    selection: Option<SharedSelection>,
}

impl TerminalSink<io::Stdout> {
    /// Draw on stdout in the alternate screen, following terminal resizes.
    pub fn stdout() -> io::Result<Self> {
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide)?;
        let size = crossterm::terminal::size().unwrap_or(FALLBACK_SIZE);
        let mut sink = Self::new(out, size.0, size.1);
        sink.track_size = true;
        sink.alternate = true;
        Ok(sink)
    }
}

impl<W: Write> TerminalSink<W> {
    /// A sink with a fixed size that writes escape sequences to `out`.
    pub fn new(out: W, width: u16, height: u16) -> Self {
        Self {
            out,
            size: (width.max(1), height.max(1)),
            track_size: false,
            alternate: false,
            status: None,
            summary: Default::default(),
            tail: Vec::new(),
            selection: None,
        }
    }

    /// Share drawn rows and pause state with a keyboard cursor and mark its
    /// row.
    #[must_use]
    pub fn with_selection(mut self, selection: SharedSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    /// The frame as plain lines, clipped to the sink size.
    #[must_use]
    pub fn compose(&self) -> Vec<FrameLine> {
        let width = usize::from(self.size.0);
        let height = usize::from(self.size.1);
        let mut lines = Vec::with_capacity(height);

        lines.push(FrameLine::plain(fit(&self.status_line(), width)));
        lines.push(FrameLine::plain(""));

        let column = (width / Group::ALL.len()).max(1);
        let headers: Vec<String> = Group::ALL
            .iter()
            .map(|group| pad(&group_title(*group), column))
            .collect();
        lines.push(FrameLine::plain(fit(&headers.concat(), width)));
        let selection = self.selection.as_ref().map(|shared| input::lock(shared).clone());
        for row in 0..SUMMARY_ROWS {
            let cells: Vec<String> = Group::ALL
                .iter()
                .zip(&self.summary)
                .map(|(group, rows)| match rows.get(row) {
                    Some(line) => {
                        let marked = selection
                            .as_ref()
                            .is_some_and(|s| s.is_selected(*group, row));
                        summary_cell(line, column, marked)
                    }
                    None => " ".repeat(column),
                })
                .collect();
            lines.push(FrameLine::plain(fit(cells.concat().trim_end(), width)));
        }
        lines.push(FrameLine::plain(""));

        lines.push(FrameLine::plain(fit(
            &format!("{:>COUNT_WIDTH$}  MESSAGE", "#"),
            width,
        )));
        let text_width = width.saturating_sub(COUNT_WIDTH + 2);
        for row in &self.tail {
            let count = format!("{:>COUNT_WIDTH$}", row.count);
            lines.push(FrameLine {
                text: fit(&format!("{count}  {}", fit(&row.text, text_width)), width),
                highlighted: row.highlighted,
            });
        }

        lines.truncate(height);
        lines
    }

    fn status_line(&self) -> String {
        let Some(status) = &self.status else {
            return "tailmon  starting".to_string();
        };
        let filter = if status.filter.is_unfiltered() {
            "all".to_string()
        } else {
            status.filter.to_string()
        };
        let state = match (status.paused, status.open, status.handle) {
            (true, _, _) => "paused".to_string(),
            (false, true, Some(handle)) => format!("live {handle}"),
            (false, true, None) => "live".to_string(),
            (false, false, _) => "disconnected".to_string(),
        };
        format!("tailmon  filter: {filter}  {state}")
    }

    fn draw(&mut self) -> io::Result<()> {
        if self.track_size
            && let Ok(size) = crossterm::terminal::size()
        {
            self.size = (size.0.max(1), size.1.max(1));
        }
        let lines = self.compose();

        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All))?;
        for (row, line) in lines.iter().enumerate() {
            let row = u16::try_from(row).unwrap_or(u16::MAX);
            queue!(self.out, MoveTo(0, row))?;
            if line.highlighted {
                queue!(
                    self.out,
                    SetForegroundColor(Color::Red),
                    Print(&line.text),
                    ResetColor
                )?;
            } else {
                queue!(self.out, Print(&line.text))?;
            }
        }
        self.out.flush()
    }

    fn redraw(&mut self) {
        if let Err(err) = self.draw() {
            tracing::debug!(error = %err, "terminal draw failed");
        }
    }
}

impl<W: Write> RenderSink for TerminalSink<W> {
    fn render_tail(&mut self, entries: &[TailEntry]) {
        self.tail = entries.iter().map(TailRow::from).collect();
        self.redraw();
    }

    fn render_summary(&mut self, views: &SummaryViews) {
        for (slot, group) in Group::ALL.iter().enumerate() {
            self.summary[slot] = views
                .view(*group)
                .sorted()
                .into_iter()
                .take(SUMMARY_ROWS)
                .map(SummaryLine::from)
                .collect();
        }
        if let Some(shared) = &self.selection {
            let mut selection = input::lock(shared);
            for (group, rows) in Group::ALL.iter().zip(&self.summary) {
                selection.set_rows(*group, rows.iter().map(|l| l.key.clone()).collect());
            }
        }
        self.redraw();
    }

    fn render_status(&mut self, status: &Status) {
        self.status = Some(status.clone());
        if let Some(shared) = &self.selection {
            input::lock(shared).set_paused(status.paused);
        }
        self.redraw();
    }
}

impl<W: Write> Drop for TerminalSink<W> {
    fn drop(&mut self) {
        if self.alternate {
            let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        }
    }
}

fn group_title(group: Group) -> String {
    match group {
        Group::Tags => "TAGS",
        Group::Priorities => "PRIORITIES",
        Group::Hosts => "HOSTS",
    }
    .to_string()
}

fn summary_cell(line: &SummaryLine, column: usize, marked: bool) -> String {
    let value = line.value.to_string();
    let value_width = value.width();
    // One space between key and value, one before the next column.
    let key_width = column.saturating_sub(value_width + 2);
    let key = if marked {
        format!("{CURSOR}{}", line.key)
    } else {
        line.key.clone()
    };
    let cell = format!("{} {value} ", pad(&key, key_width));
    pad(&cell, column)
}

/// Cut `text` to at most `width` columns, ending with an ellipsis when cut.
///
/// Control characters become spaces.
#[must_use]
pub fn fit(text: &str, width: usize) -> String {
    let clean: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if clean.width() <= width {
        return clean;
    }
    if width == 0 {
        return String::new();
    }

    let budget = width - ELLIPSIS.width();
    let mut used = 0;
    let mut out = String::with_capacity(clean.len());
    for grapheme in clean.graphemes(true) {
        let w = grapheme.width();
        if used + w > budget {
            break;
        }
        used += w;
        out.push_str(grapheme);
    }
    out.push_str(ELLIPSIS);
    out
}

/// [`fit`] then pad with spaces to exactly `width` columns.
#[must_use]
pub fn pad(text: &str, width: usize) -> String {
    let mut out = fit(text, width);
    let used = out.width();
    out.extend(std::iter::repeat_n(' ', width.saturating_sub(used)));
    out
}
