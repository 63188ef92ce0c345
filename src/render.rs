//! Line-oriented output of diff items and the verbose summary

use crossterm::style::{Color, Stylize};
use std::io::{self, Write};

use crate::compare::{ChangeKind, DiffItem};
use crate::outcome::{Summary, Verdict};

fn marker(kind: ChangeKind) -> (char, Color) {
    match kind {
        ChangeKind::Added => ('+', Color::Green),
        ChangeKind::Removed => ('-', Color::Red),
        ChangeKind::Modified => ('~', Color::Yellow),
    }
}

/// `+ path`, `- path` or `~ path`, with `/` after directories
pub fn format_item(item: &DiffItem, color: bool) -> String {
    let (sign, tint) = marker(item.kind);
    let slash = if item.is_dir { "/" } else { "" };
    let line = format!("{} {}{}", sign, item.path, slash);
    if color {
        line.with(tint).to_string()
    } else {
        line
    }
}

pub fn write_items<W: Write>(out: &mut W, items: &[DiffItem], color: bool) -> io::Result<()> {
    for item in items {
        writeln!(out, "{}", format_item(item, color))?;
    }
    out.flush()
}

/// Non-zero counts joined with commas, e.g. `Summary: 2 modified files, 1 added dirs`
pub fn summary_line(summary: &Summary, show_all: bool) -> String {
    let counts = [
        (summary.modified_files, "modified files"),
        (summary.added_files, "added files"),
        (summary.removed_files, "removed files"),
        (summary.added_dirs, "added dirs"),
        (summary.removed_dirs, "removed dirs"),
    ];
    let parts: Vec<String> = counts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, what)| format!("{} {}", n, what))
        .collect();
    let mut line = format!("Summary: {}", parts.join(", "));
    if !show_all && summary.added_dirs + summary.removed_dirs > 0 {
        line.push_str(" (subdirectories/files inside them not listed)");
    }
    line
}

/// Summary line and verdict sentence, for `--verbose`.
///
/// Identical trees get the verdict sentence alone.
pub fn write_summary<W: Write>(
    out: &mut W,
    summary: &Summary,
    verdict: Verdict,
    show_all: bool,
) -> io::Result<()> {
    if verdict != Verdict::Identical {
        writeln!(out, "{}", summary_line(summary, show_all))?;
    }
    writeln!(out, "{}", verdict.message())?;
    out.flush()
}
