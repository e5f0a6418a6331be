//! TUI color theme

use domai_common::Severity;
use ratatui::style::Color;

pub const SAFE_GREEN: Color = Color::Rgb(0, 255, 0);
pub const CRITICAL_RED: Color = Color::Rgb(255, 0, 0);
pub const CAUTION_AMBER: Color = Color::Rgb(255, 191, 0);
pub const INFO_DIM: Color = Color::Rgb(0, 180, 0);
pub const TEXT: Color = Color::White;

#[must_use]
pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical | Severity::High => CRITICAL_RED,
        Severity::Medium => CAUTION_AMBER,
        Severity::Low => SAFE_GREEN,
        Severity::Info => INFO_DIM,
    }
}

/// Fixed-width marker shown in front of crisis lines
#[must_use]
pub fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "!!!",
        Severity::High => "!! ",
        Severity::Medium => "!  ",
        Severity::Low | Severity::Info => "   ",
    }
}
