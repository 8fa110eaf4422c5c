#![forbid(unsafe_code)]

//! Keyboard control.
//!
//! [`InputGuard`] switches the terminal to raw mode and reads `crossterm`
//! events on a background thread. Each event is mapped by [`map_event`]
//! against the shared [`Selection`] and the result is posted to the monitor.
//!
//! | Key                 | Effect                                  |
//! |---------------------|-----------------------------------------|
//! | Up/Down, `k`/`j`    | Move the cursor within a summary column |
//! | Left/Right, `h`/`l` | Move to the previous/next column        |
//! | Tab / Shift+Tab     | Same as Right / Left                    |
//! | Enter               | Follow the selected row                 |
//! | `a`                 | Follow everything                       |
//! | `p`                 | Pause or resume the tail                |
//! | `c`                 | Clear the tail                          |
//! | `r`                 | Reconnect                               |
//! | `q`, Esc, Ctrl+C    | Quit                                    |
//!
//! Raw mode swallows Ctrl+C, so it is mapped to `Shutdown` here.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tailmon_core::{Group, KeyDigest};
use tailmon_runtime::{Command, MonitorEvent, MonitorHandle, StopSignal, StopTrigger};

/// How long one wait for terminal input lasts before the stop flag is checked.
const READ_POLL: Duration = Duration::from_millis(100);

/// Cursor over the summary rows last drawn, plus the last drawn pause state.
///
/// The terminal sink writes rows and pause state; the input thread reads
/// them and moves the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    column: usize,
    row: usize,
    keys: [Vec<String>; 3],
    paused: bool,
}

/// [`Selection`] shared between the render and input threads.
pub type SharedSelection = Arc<Mutex<Selection>>;

/// Lock a shared selection, ignoring poisoning.
pub fn lock(selection: &SharedSelection) -> MutexGuard<'_, Selection> {
    selection.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slot(group: Group) -> usize {
    Group::ALL.iter().position(|g| *g == group).unwrap_or(0)
}

impl Selection {
    #[must_use]
    pub fn shared() -> SharedSelection {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Replace the keys shown for `group`, top row first.
    pub fn set_rows(&mut self, group: Group, keys: Vec<String>) {
        self.keys[slot(group)] = keys;
        self.clamp();
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn group(&self) -> Group {
        Group::ALL[self.column]
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    /// The group and key under the cursor, if its column has that row.
    #[must_use]
    pub fn selected(&self) -> Option<(Group, &str)> {
        self.keys[self.column]
            .get(self.row)
            .map(|key| (self.group(), key.as_str()))
    }

    #[must_use]
    pub fn is_selected(&self, group: Group, row: usize) -> bool {
        slot(group) == self.column && row == self.row && row < self.keys[self.column].len()
    }

    fn move_row(&mut self, down: bool) {
        if down {
            self.row += 1;
        } else {
            self.row = self.row.saturating_sub(1);
        }
        self.clamp();
    }

    fn move_column(&mut self, right: bool) {
        let columns = Group::ALL.len();
        self.column = if right {
            (self.column + 1) % columns
        } else {
            (self.column + columns - 1) % columns
        };
        self.clamp();
    }

    fn clamp(&mut self) {
        let len = self.keys[self.column].len();
        self.row = self.row.min(len.saturating_sub(1));
    }
}

/// Map one terminal event to a monitor event.
///
/// Resizes redraw the frame; mouse, focus and paste events are ignored.
pub fn map_event(event: &Event, selection: &mut Selection) -> Option<MonitorEvent> {
    match event {
        Event::Key(key) => map_key(key, selection),
        Event::Resize(..) => Some(MonitorEvent::Command(Command::Redraw)),
        _ => None,
    }
}

/// Map one key press. Releases and unbound keys give `None`.
pub fn map_key(key: &KeyEvent, selection: &mut Selection) -> Option<MonitorEvent> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return (key.code == KeyCode::Char('c')).then_some(MonitorEvent::Shutdown);
    }

    let command = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Some(MonitorEvent::Shutdown),
        KeyCode::Enter => {
            let (group, name) = selection.selected()?;
            Command::Activate {
                group,
                digest: KeyDigest::of(name),
            }
        }
        KeyCode::Char('a') => Command::SetFilter(KeyDigest::unfiltered()),
        KeyCode::Char('p') => {
            // Flipped now so a second press before the next frame toggles back.
            let resume = selection.paused;
            selection.paused = !resume;
            if resume { Command::Resume } else { Command::Pause }
        }
        KeyCode::Char('c') => Command::Clear,
        KeyCode::Char('r') => Command::Reconnect,
        KeyCode::Up | KeyCode::Char('k') => {
            selection.move_row(false);
            Command::Redraw
        }
        KeyCode::Down | KeyCode::Char('j') => {
            selection.move_row(true);
            Command::Redraw
        }
        KeyCode::Left | KeyCode::BackTab | KeyCode::Char('h') => {
            selection.move_column(false);
            Command::Redraw
        }
        KeyCode::Right | KeyCode::Tab | KeyCode::Char('l') => {
            selection.move_column(true);
            Command::Redraw
        }
        _ => return None,
    };
    Some(MonitorEvent::Command(command))
}

/// Reads the keyboard while alive. Raw mode is restored on drop.
#[derive(Debug)]
pub struct InputGuard {
    trigger: StopTrigger,
    thread: Option<thread::JoinHandle<()>>,
}

impl InputGuard {
    /// Enter raw mode and start the input thread.
    ///
    /// # Errors
    ///
    /// Fails when stdin is not a terminal or the thread cannot be spawned.
    pub fn install(monitor: MonitorHandle, selection: SharedSelection) -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        tracing::debug!("terminal raw mode enabled");

        let (signal, trigger) = StopSignal::new();
        let spawned = thread::Builder::new()
            .name("tailmon-input".into())
            .spawn(move || read_loop(&monitor, &selection, &signal));
        match spawned {
            Ok(thread) => Ok(Self {
                trigger,
                thread: Some(thread),
            }),
            Err(err) => {
                let _ = crossterm::terminal::disable_raw_mode();
                Err(err)
            }
        }
    }
}

impl Drop for InputGuard {
    fn drop(&mut self) {
        self.trigger.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = crossterm::terminal::disable_raw_mode();
        tracing::debug!("terminal raw mode disabled");
    }
}

fn read_loop(monitor: &MonitorHandle, selection: &SharedSelection, stop: &StopSignal) {
    while !stop.is_stopped() {
        match crossterm::event::poll(READ_POLL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "terminal input failed");
                return;
            }
        }
        let event = match crossterm::event::read() {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "terminal input failed");
                return;
            }
        };
        let Some(mapped) = map_event(&event, &mut lock(selection)) else {
            continue;
        };
        let quit = matches!(mapped, MonitorEvent::Shutdown);
        if !monitor.send(mapped) || quit {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn command(event: Option<MonitorEvent>) -> Command {
        match event {
            Some(MonitorEvent::Command(command)) => command,
            other => panic!("expected a command, got {other:?}"),
        }
    }

    fn filled() -> Selection {
        let mut selection = Selection::default();
        selection.set_rows(Group::Tags, vec!["sshd".into(), "cron".into()]);
        selection.set_rows(Group::Priorities, vec!["auth.warning".into()]);
        selection
    }

    // ====================================================================
    // Cursor
    // ====================================================================

    #[test]
    fn cursor_stays_within_the_column() {
        let mut selection = filled();
        assert_eq!(selection.selected(), Some((Group::Tags, "sshd")));

        selection.move_row(true);
        selection.move_row(true);
        assert_eq!(selection.selected(), Some((Group::Tags, "cron")));

        selection.move_column(true);
        assert_eq!(selection.row(), 0);
        assert_eq!(selection.selected(), Some((Group::Priorities, "auth.warning")));

        selection.move_row(false);
        assert_eq!(selection.row(), 0);
    }

    #[test]
    fn columns_wrap_around() {
        let mut selection = filled();
        selection.move_column(false);
        assert_eq!(selection.group(), Group::Hosts);
        assert_eq!(selection.selected(), None);
        selection.move_column(true);
        assert_eq!(selection.group(), Group::Tags);
    }

    #[test]
    fn shrinking_rows_pull_the_cursor_up() {
        let mut selection = filled();
        selection.move_row(true);
        selection.set_rows(Group::Tags, vec!["sshd".into()]);
        assert_eq!(selection.selected(), Some((Group::Tags, "sshd")));
        assert!(selection.is_selected(Group::Tags, 0));
        assert!(!selection.is_selected(Group::Hosts, 0));
    }

    // ====================================================================
    // Key mapping
    // ====================================================================

    #[test]
    fn enter_activates_the_selected_row() {
        let mut selection = filled();
        map_key(&press(KeyCode::Down), &mut selection);
        match command(map_key(&press(KeyCode::Enter), &mut selection)) {
            Command::Activate { group, digest } => {
                assert_eq!(group, Group::Tags);
                assert_eq!(digest, KeyDigest::of("cron"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn enter_on_an_empty_column_does_nothing() {
        let mut selection = Selection::default();
        assert!(map_key(&press(KeyCode::Enter), &mut selection).is_none());
    }

    #[test]
    fn pause_key_toggles() {
        let mut selection = filled();
        assert!(matches!(
            command(map_key(&press(KeyCode::Char('p')), &mut selection)),
            Command::Pause
        ));
        assert!(matches!(
            command(map_key(&press(KeyCode::Char('p')), &mut selection)),
            Command::Resume
        ));

        selection.set_paused(true);
        assert!(matches!(
            command(map_key(&press(KeyCode::Char('p')), &mut selection)),
            Command::Resume
        ));
    }

    #[test]
    fn quit_keys_shut_down() {
        let mut selection = filled();
        for key in [
            press(KeyCode::Char('q')),
            press(KeyCode::Esc),
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        ] {
            assert!(matches!(
                map_key(&key, &mut selection),
                Some(MonitorEvent::Shutdown)
            ));
        }
        let other = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL);
        assert!(map_key(&other, &mut selection).is_none());
    }

    #[test]
    fn releases_and_unbound_keys_are_ignored() {
        let mut selection = filled();
        let release = KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert!(map_key(&release, &mut selection).is_none());
        assert!(map_key(&press(KeyCode::F(5)), &mut selection).is_none());
    }

    #[test]
    fn resize_redraws() {
        let mut selection = Selection::default();
        assert!(matches!(
            command(map_event(&Event::Resize(100, 40), &mut selection)),
            Command::Redraw
        ));
        assert!(map_event(&Event::FocusGained, &mut selection).is_none());
    }
}
