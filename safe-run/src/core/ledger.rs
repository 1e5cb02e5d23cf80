//! Append-only, sequence-numbered record of one invocation.
//!
//! Sequence numbers are assigned at append time under the ledger's own
//! counter, so the order of `events()` is the order in which the supervisor
//! observed things, across all channels.
//!
//! The ledger does not hold output text. Consecutive lines on one stream are
//! stored as a single run, and the lines themselves live wherever the caller
//! spills them (one file per stream), in the same order. Only meta payloads
//! and a bounded tail of recent output are kept in memory.

use std::collections::VecDeque;

use super::command_line::display_command;
use super::types::{Channel, ChildExit, TermSignal};

/// One observed fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event<'a> {
    /// Globally unique, strictly increasing, starting at 1.
    pub seq: u64,
    pub channel: Channel,
    /// Text of a meta event. `None` for output lines, whose text is the next
    /// unread line of that channel's spill.
    pub payload: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Meta(String),
    Output { channel: Channel, lines: u64 },
}

impl Entry {
    fn len(&self) -> u64 {
        match self {
            Entry::Meta(_) => 1,
            Entry::Output { lines, .. } => *lines,
        }
    }
}

/// Ordered events for one invocation.
///
/// The first event is the start event and, once sealed, the last event is the
/// exit event. Appends after sealing are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<Entry>,
    last_seq: u64,
    events: u64,
    stdout_lines: u64,
    stderr_lines: u64,
    tail: VecDeque<String>,
    tail_capacity: usize,
    sealed: bool,
}

impl Ledger {
    /// Create a ledger whose first event records the command line.
    pub fn start(argv: &[String]) -> Self {
        let mut ledger = Ledger::default();
        ledger.append_meta(start_payload(argv));
        ledger
    }

    /// Keep the last `lines` output lines in memory for [`Ledger::output_tail`].
    pub fn with_tail(mut self, lines: usize) -> Self {
        self.tail_capacity = lines;
        self.tail = VecDeque::with_capacity(lines.min(1_024));
        self
    }

    fn next_seq(&mut self) -> Option<u64> {
        if self.sealed {
            return None;
        }
        self.last_seq += 1;
        self.events += 1;
        Some(self.last_seq)
    }

    /// Append a meta event and return its sequence number, or `None` when the
    /// ledger is already sealed.
    pub fn append_meta(&mut self, payload: impl Into<String>) -> Option<u64> {
        let seq = self.next_seq()?;
        self.entries.push(Entry::Meta(payload.into()));
        Some(seq)
    }

    /// Record that one line arrived on `channel`.
    ///
    /// The text only feeds the tail; the caller is responsible for spilling
    /// it. A meta channel is recorded as a meta event.
    pub fn append_output(&mut self, channel: Channel, line: &str) -> Option<u64> {
        let counter = match channel {
            Channel::Stdout => &mut self.stdout_lines,
            Channel::Stderr => &mut self.stderr_lines,
            Channel::Meta => return self.append_meta(line),
        };
        if self.sealed {
            return None;
        }
        *counter += 1;
        let seq = self.next_seq()?;
        match self.entries.last_mut() {
            Some(Entry::Output {
                channel: last,
                lines,
            }) if *last == channel => *lines += 1,
            _ => self.entries.push(Entry::Output { channel, lines: 1 }),
        }
        if self.tail_capacity > 0 {
            if self.tail.len() == self.tail_capacity {
                self.tail.pop_front();
            }
            self.tail.push_back(line.to_string());
        }
        Some(seq)
    }

    /// Append the exit event and refuse any further appends.
    pub fn seal(&mut self, exit_payload: impl Into<String>) -> Option<u64> {
        let seq = self.append_meta(exit_payload);
        self.sealed = true;
        seq
    }

    /// Move the events out, leaving an empty sealed ledger behind so late
    /// writers holding a shared handle cannot add anything.
    pub fn take(&mut self) -> Ledger {
        let taken = std::mem::take(self);
        self.last_seq = taken.last_seq;
        self.sealed = true;
        taken
    }

    /// Every event in sequence order.
    pub fn events(&self) -> impl Iterator<Item = Event<'_>> + '_ {
        self.entries
            .iter()
            .scan(0u64, |seen, entry| {
                let first = *seen + 1;
                *seen += entry.len();
                Some((first, entry))
            })
            .flat_map(|(first, entry)| {
                let (channel, payload) = match entry {
                    Entry::Meta(payload) => (Channel::Meta, Some(payload.as_str())),
                    Entry::Output { channel, .. } => (*channel, None),
                };
                (0..entry.len()).map(move |offset| Event {
                    seq: first + offset,
                    channel,
                    payload,
                })
            })
    }

    pub fn len(&self) -> usize {
        usize::try_from(self.events).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of output lines recorded on `channel`.
    pub fn line_count(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Stdout => self.stdout_lines,
            Channel::Stderr => self.stderr_lines,
            Channel::Meta => 0,
        }
    }

    /// Meta payloads in sequence order.
    pub fn meta_payloads(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Meta(payload) => Some(payload.as_str()),
            Entry::Output { .. } => None,
        })
    }

    /// True if a meta event carries exactly `payload`.
    pub fn contains_meta(&self, payload: &str) -> bool {
        self.meta_payloads().any(|meta| meta == payload)
    }

    /// Up to the last `count` output lines, across both streams, in order.
    /// Never more than the capacity given to [`Ledger::with_tail`].
    pub fn output_tail(&self, count: usize) -> impl Iterator<Item = &str> {
        let skip = self.tail.len().saturating_sub(count);
        self.tail.iter().skip(skip).map(String::as_str)
    }
}

/// Payload of the first event.
pub fn start_payload(argv: &[String]) -> String {
    format!("safe-run start: cmd=\"{}\"", display_command(argv))
}

/// Payload of the event recording that a termination signal arrived.
pub fn abort_payload(signal: TermSignal, child_pid: u32) -> String {
    format!(
        "safe-run abort: received {}, forwarded to child pid {}",
        signal.name(),
        child_pid
    )
}

/// Payload recorded when a termination signal arrives after the child has
/// already exited.
pub fn late_abort_payload(signal: TermSignal) -> String {
    format!(
        "safe-run abort: received {} after child exit, stopped draining output",
        signal.name()
    )
}

/// Payload of the event recording a forced kill after the grace period.
pub fn escalation_payload(child_pid: u32) -> String {
    format!("safe-run abort: child pid {child_pid} still running, sent SIGKILL")
}

/// Payload of the final event.
///
/// `code` is what the supervisor itself exits with.
pub fn exit_payload(code: i32, child: Option<ChildExit>, aborted: Option<TermSignal>) -> String {
    let mut payload = format!("safe-run exit: code={code}");
    if let Some(ChildExit::Signal(signo)) = child {
        payload.push_str(&format!(" signal={signo}"));
    }
    if let Some(signal) = aborted {
        payload.push_str(&format!(" aborted={}", signal.name()));
    }
    payload
}
