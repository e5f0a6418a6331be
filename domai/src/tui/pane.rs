//! Scrollable pane holding the recent entries of one stream

use std::collections::VecDeque;

use domai_common::StreamKind;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::theme::{severity_color, severity_marker, CAUTION_AMBER, INFO_DIM, SAFE_GREEN, TEXT};
use crate::dispatch::Envelope;

pub struct StreamPane {
    kind: StreamKind,
    entries: VecDeque<Envelope>,
    capacity: usize,
    /// Lines scrolled back from the newest entry
    scroll: usize,
    received: u64,
}

impl StreamPane {
    pub fn new(kind: StreamKind, capacity: usize) -> Self {
        Self { kind, entries: VecDeque::new(), capacity: capacity.max(1), scroll: 0, received: 0 }
    }

    pub fn push(&mut self, envelope: Envelope) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
        self.received += 1;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.scroll = 0;
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 1).min(self.line_count().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    fn line_count(&self) -> usize {
        self.entries.iter().map(|e| e.text.lines().count().max(1)).sum()
    }

    fn lines(&self) -> Vec<Line<'_>> {
        let mut lines = Vec::new();
        for envelope in &self.entries {
            let time = envelope.event.timestamp.format("%H:%M:%S").to_string();
            let color = severity_color(envelope.severity());
            let mut text = envelope.text.lines();
            let first = text.next().unwrap_or_default();
            let mut spans = vec![Span::styled(format!("{time} "), Style::new().fg(INFO_DIM))];
            if self.kind == StreamKind::Crisis {
                spans.push(Span::styled(
                    severity_marker(envelope.severity()),
                    Style::new().fg(color).add_modifier(Modifier::BOLD),
                ));
                spans.push(Span::styled(first, Style::new().fg(color)));
            } else {
                spans.push(Span::styled(first, Style::new().fg(TEXT)));
            }
            lines.push(Line::from(spans));
            // Multi-line explanations continue under the timestamp column
            for rest in text {
                lines.push(Line::from(Span::styled(format!("         {rest}"), Style::new().fg(TEXT))));
            }
        }
        lines
    }

    pub fn render(&self, f: &mut Frame, area: Rect, title: &str, focused: bool) {
        let lines = self.lines();
        let height = usize::from(area.height.saturating_sub(2));
        let end = lines.len().saturating_sub(self.scroll);
        let start = end.saturating_sub(height);
        let visible: Vec<Line<'_>> = lines.into_iter().skip(start).take(end - start).collect();

        let border = if focused { CAUTION_AMBER } else { SAFE_GREEN };
        let mut heading = format!(" {title} ({}) ", self.received);
        if self.scroll > 0 {
            heading.push_str(&format!("[-{}] ", self.scroll));
        }
        let pane = Paragraph::new(visible).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(heading, Style::new().fg(border).add_modifier(Modifier::BOLD)))
                .border_style(Style::new().fg(border)),
        );
        f.render_widget(pane, area);
    }
}
