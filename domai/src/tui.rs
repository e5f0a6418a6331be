//! # Terminal User Interface (TUI)
//!
//! Live two-pane view of the dual streams using `ratatui`:
//!
//! ```text
//! ┌ header: tier | counts ──────────────────────────────┐
//! ├ crisis (alerts) ─────────┬ knowledge (at tier) ──────┤
//! │                          │                           │
//! ├ keys ────────────────────┴───────────────────────────┤
//! ```
//!
//! Envelopes arrive on a crossbeam channel fed from the async side; the TUI
//! runs on its own thread and never touches the dispatcher directly. Tier
//! changes are reported back through a callback so the caller can retarget
//! its knowledge subscription.

#![allow(clippy::needless_pass_by_value)]

use std::io;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use domai_common::{StreamKind, Tier};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};

use crate::dispatch::Envelope;
use crate::domain::TuiError;

mod pane;
mod theme;

use pane::StreamPane;
use theme::{CAUTION_AMBER, CRITICAL_RED, INFO_DIM, SAFE_GREEN};

const STYLE_HEADING: Style = Style::new().fg(SAFE_GREEN).add_modifier(Modifier::BOLD);
const STYLE_DIM: Style = Style::new().fg(INFO_DIM);
const STYLE_KEY: Style = Style::new().fg(CAUTION_AMBER);

/// Entries kept per pane
const PANE_HISTORY: usize = 500;
const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

struct LiveApp {
    crisis: StreamPane,
    knowledge: StreamPane,
    tier: Tier,
    focus: StreamKind,
    /// Set once the feeding side has gone away
    finished: bool,
    should_quit: bool,
    started: Instant,
}

impl LiveApp {
    fn new(tier: Tier) -> Self {
        Self {
            crisis: StreamPane::new(StreamKind::Crisis, PANE_HISTORY),
            knowledge: StreamPane::new(StreamKind::Knowledge, PANE_HISTORY),
            tier,
            focus: StreamKind::Crisis,
            finished: false,
            should_quit: false,
            started: Instant::now(),
        }
    }

    fn accept(&mut self, envelope: Envelope) {
        match envelope.stream {
            StreamKind::Crisis => self.crisis.push(envelope),
            StreamKind::Knowledge => self.knowledge.push(envelope),
        }
    }

    fn focused(&mut self) -> &mut StreamPane {
        match self.focus {
            StreamKind::Crisis => &mut self.crisis,
            StreamKind::Knowledge => &mut self.knowledge,
        }
    }

    /// Returns the new tier when the key changed it
    fn handle_key(&mut self, key: KeyCode) -> Option<Tier> {
        match key {
            KeyCode::Char('q' | 'Q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('t' | 'T') => {
                self.tier = self.tier.next();
                return Some(self.tier);
            }
            KeyCode::Tab => {
                self.focus = match self.focus {
                    StreamKind::Crisis => StreamKind::Knowledge,
                    StreamKind::Knowledge => StreamKind::Crisis,
                };
            }
            KeyCode::Up => self.focused().scroll_up(),
            KeyCode::Down => self.focused().scroll_down(),
            KeyCode::Char('c' | 'C') => self.focused().clear(),
            _ => {}
        }
        None
    }
}

/// Run the live view until `q` is pressed or the channel disconnects
///
/// `on_tier` is called with the new tier each time the user cycles it.
///
/// # Errors
/// Returns an error if terminal setup or rendering fails
pub fn run_live(
    envelopes: Receiver<Envelope>,
    tier: Tier,
    mut on_tier: impl FnMut(Tier),
) -> Result<(), TuiError> {
    enable_raw_mode().map_err(|e| TuiError::TerminalError(format!("raw mode unavailable: {e}")))?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &envelopes, tier, &mut on_tier);

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    envelopes: &Receiver<Envelope>,
    tier: Tier,
    on_tier: &mut impl FnMut(Tier),
) -> Result<(), TuiError> {
    let mut app = LiveApp::new(tier);
    let mut last_update: Option<Instant> = None;

    loop {
        loop {
            match envelopes.try_recv() {
                Ok(envelope) => app.accept(envelope),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    app.finished = true;
                    break;
                }
            }
        }
        if app.finished {
            break;
        }

        if last_update.map_or(true, |at| at.elapsed() >= UPDATE_INTERVAL) {
            terminal.draw(|f| draw(f, &app))?;
            last_update = Some(Instant::now());
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    // Raw mode swallows SIGINT
                    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                        break;
                    }
                    if let Some(tier) = app.handle_key(key.code) {
                        on_tier(tier);
                    }
                }
            }
        }
        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn draw(f: &mut ratatui::Frame, app: &LiveApp) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(f.area());

    let header = Paragraph::new(Line::from(vec![
        Span::styled("DOMAI", STYLE_HEADING),
        Span::styled(" | ", STYLE_DIM),
        Span::styled("[LIVE]", Style::new().fg(CRITICAL_RED).add_modifier(Modifier::BOLD)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("tier: {}", app.tier), Style::new().fg(CAUTION_AMBER)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("{}s", app.started.elapsed().as_secs()), Style::new().fg(SAFE_GREEN)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(
            format!("{} alerts, {} explanations", app.crisis.received(), app.knowledge.received()),
            Style::new().fg(SAFE_GREEN),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(CRITICAL_RED)));
    f.render_widget(header, outer[0]);

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(outer[1]);
    app.crisis.render(f, panes[0], "CRISIS", app.focus == StreamKind::Crisis);
    app.knowledge.render(
        f,
        panes[1],
        &format!("KNOWLEDGE @ {}", app.tier),
        app.focus == StreamKind::Knowledge,
    );

    let keys = Line::from(vec![
        Span::styled("Q", STYLE_KEY),
        Span::styled(":Quit ", STYLE_DIM),
        Span::styled("T", STYLE_KEY),
        Span::styled(":Tier ", STYLE_DIM),
        Span::styled("Tab", STYLE_KEY),
        Span::styled(":Focus ", STYLE_DIM),
        Span::styled("↑↓", STYLE_KEY),
        Span::styled(":Scroll ", STYLE_DIM),
        Span::styled("C", STYLE_KEY),
        Span::styled(":Clear", STYLE_DIM),
    ]);
    let status = Paragraph::new(keys)
        .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(SAFE_GREEN)));
    f.render_widget(status, outer[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_cycles_and_reports() {
        let mut app = LiveApp::new(Tier::Novice);
        assert_eq!(app.handle_key(KeyCode::Char('t')), Some(Tier::Novice.next()));
        assert_eq!(app.tier, Tier::Novice.next());
        assert_eq!(app.handle_key(KeyCode::Tab), None);
        assert_eq!(app.focus, StreamKind::Knowledge);
    }

    #[test]
    fn test_quit_keys() {
        let mut app = LiveApp::new(Tier::Expert);
        app.handle_key(KeyCode::Char('x'));
        assert!(!app.should_quit);
        app.handle_key(KeyCode::Char('q'));
        assert!(app.should_quit);
    }
}
