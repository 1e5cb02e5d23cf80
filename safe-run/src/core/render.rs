//! Textual views of a completed ledger.
//!
//! Output text comes from an [`OutputSource`], one line per output event in
//! ledger order. Rendering streams from the source into the writer and never
//! accumulates more than one line at a time.

use std::io::{self, BufRead, Write};

use super::ledger::{Event, Ledger};
use super::types::{Channel, ViewMode};

pub const STDOUT_HEADER: &str = "=== STDOUT ===";
pub const STDERR_HEADER: &str = "=== STDERR ===";
pub const EVENTS_BEGIN: &str = "--- BEGIN EVENTS ---";
pub const EVENTS_END: &str = "--- END EVENTS ---";
pub const MERGED_BEGIN: &str = "--- BEGIN MERGED (OBSERVED ORDER) ---";
pub const MERGED_END: &str = "--- END MERGED ---";

/// Captured output of each stream, readable from the start as often as
/// needed. Each line is `\n`-terminated.
pub trait OutputSource {
    type Reader: BufRead;

    fn open(&self, channel: Channel) -> io::Result<Self::Reader>;
}

/// Write `ledger` in the requested view.
pub fn render<S: OutputSource, W: Write>(
    ledger: &Ledger,
    output: &S,
    view: ViewMode,
    out: &mut W,
) -> io::Result<()> {
    match view {
        ViewMode::Split => render_split(ledger, output, out),
        ViewMode::Merged => render_merged(ledger, output, out),
    }
}

fn render_split<S: OutputSource, W: Write>(
    ledger: &Ledger,
    output: &S,
    out: &mut W,
) -> io::Result<()> {
    for (header, channel) in [
        (STDOUT_HEADER, Channel::Stdout),
        (STDERR_HEADER, Channel::Stderr),
    ] {
        writeln!(out, "{header}")?;
        io::copy(&mut output.open(channel)?, out)?;
        writeln!(out)?;
    }

    writeln!(out, "{EVENTS_BEGIN}")?;
    for_each_line(ledger, output, |seq, channel, text| {
        writeln!(out, "[SEQ={seq}][{channel}] {text}")
    })?;
    writeln!(out, "{EVENTS_END}")
}

fn render_merged<S: OutputSource, W: Write>(
    ledger: &Ledger,
    output: &S,
    out: &mut W,
) -> io::Result<()> {
    writeln!(out, "{MERGED_BEGIN}")?;
    for_each_line(ledger, output, |seq, channel, text| {
        writeln!(out, "[#{seq}][{channel}] {text}")
    })?;
    writeln!(out, "{MERGED_END}")
}

/// Walk the ledger, pairing each output event with its line from `output`.
fn for_each_line<S, F>(ledger: &Ledger, output: &S, mut emit: F) -> io::Result<()>
where
    S: OutputSource,
    F: FnMut(u64, Channel, &str) -> io::Result<()>,
{
    let mut stdout = output.open(Channel::Stdout)?;
    let mut stderr = output.open(Channel::Stderr)?;
    let mut line = String::new();
    for Event {
        seq,
        channel,
        payload,
    } in ledger.events()
    {
        let text = match (payload, channel) {
            (Some(payload), _) => payload,
            (None, Channel::Stderr) => next_line(&mut stderr, &mut line, channel)?,
            (None, _) => next_line(&mut stdout, &mut line, channel)?,
        };
        emit(seq, channel, text)?;
    }
    Ok(())
}

fn next_line<'a, R: BufRead>(
    reader: &mut R,
    line: &'a mut String,
    channel: Channel,
) -> io::Result<&'a str> {
    line.clear();
    if reader.read_line(line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("captured {channel} output ends before the ledger does"),
        ));
    }
    let text: &'a str = line.as_str();
    Ok(text.strip_suffix('\n').unwrap_or(text))
}

/// Write the operator-facing tail of combined output.
pub fn write_snippet<W: Write>(ledger: &Ledger, lines: usize, out: &mut W) -> io::Result<()> {
    writeln!(out, "--- safe-run failure tail ({lines} lines) ---")?;
    for line in ledger.output_tail(lines) {
        writeln!(out, "{line}")?;
    }
    writeln!(out, "--- end tail ---")
}
