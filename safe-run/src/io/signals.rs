//! Termination signals: watching the supervisor's own and forwarding them to
//! the child.

use crate::core::types::TermSignal;
use crate::io::process::AbortHandle;

#[cfg(unix)]
pub use unix::{SignalWatcher, forward, kill_hard, terminate_self};

#[cfg(not(unix))]
pub use fallback::{SignalWatcher, forward, kill_hard, terminate_self};

#[cfg(unix)]
mod unix {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::thread::{self, JoinHandle};

    use anyhow::{Context, Result};
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::{Handle, Signals};
    use signal_hook::low_level::emulate_default_handler;
    use tracing::{debug, warn};

    use super::{AbortHandle, TermSignal};

    /// Routes SIGINT/SIGTERM delivered to this process into an [`AbortHandle`]
    /// until dropped.
    ///
    /// While the watcher is installed the default "terminate immediately"
    /// disposition is replaced, so the supervisor survives long enough to
    /// stop the child and write the aborted artifact. A signal that arrives
    /// once the collector is gone is held and returned by
    /// [`SignalWatcher::finish`].
    pub struct SignalWatcher {
        handle: Handle,
        thread: Option<JoinHandle<()>>,
        pending: Arc<AtomicI32>,
    }

    impl SignalWatcher {
        pub fn install(abort: AbortHandle) -> Result<Self> {
            let mut signals =
                Signals::new([SIGINT, SIGTERM]).context("register SIGINT/SIGTERM handlers")?;
            let handle = signals.handle();
            let pending = Arc::new(AtomicI32::new(0));
            let held = Arc::clone(&pending);
            let thread = thread::Builder::new()
                .name("safe-run-signals".to_string())
                .spawn(move || {
                    for signo in signals.forever() {
                        if let Some(signal) = TermSignal::from_number(signo) {
                            route(&abort, &held, signal);
                        }
                    }
                })
                .context("spawn signal watcher thread")?;
            Ok(Self {
                handle,
                thread: Some(thread),
                pending,
            })
        }

        /// Stop watching and return the first signal that arrived after the
        /// collector stopped accepting aborts.
        pub fn finish(mut self) -> Option<TermSignal> {
            self.stop();
            TermSignal::from_number(self.pending.load(Ordering::SeqCst))
        }

        fn stop(&mut self) {
            self.handle.close();
            if let Some(thread) = self.thread.take()
                && thread.join().is_err()
            {
                warn!("signal watcher thread panicked");
            }
        }
    }

    impl Drop for SignalWatcher {
        fn drop(&mut self) {
            self.stop();
        }
    }

    /// Hand `signal` to the collector, or hold it if the collector is gone.
    pub(super) fn route(abort: &AbortHandle, pending: &AtomicI32, signal: TermSignal) {
        debug!(signal = signal.name(), "termination signal received");
        if !abort.abort(signal) {
            let _ = pending.compare_exchange(
                0,
                signal.number(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// Terminate this process the way an unhandled `signal` would.
    pub fn terminate_self(signal: TermSignal) -> Result<()> {
        emulate_default_handler(signal.number())
            .with_context(|| format!("re-deliver {}", signal.name()))
    }

    /// Send the equivalent of `signal` to `pid`. A process that is already
    /// gone is not an error.
    pub fn forward(pid: u32, signal: TermSignal) -> Result<()> {
        let nix_signal = match signal {
            TermSignal::Interrupt => Signal::SIGINT,
            TermSignal::Terminate => Signal::SIGTERM,
        };
        send(pid, nix_signal)
    }

    pub fn kill_hard(pid: u32) -> Result<()> {
        send(pid, Signal::SIGKILL)
    }

    fn send(pid: u32, signal: Signal) -> Result<()> {
        let raw = i32::try_from(pid).context("child pid out of range")?;
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(errno).with_context(|| format!("send {signal} to pid {pid}")),
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use anyhow::{Result, bail};

    use super::{AbortHandle, TermSignal};

    /// No-op on platforms without POSIX signals.
    pub struct SignalWatcher;

    impl SignalWatcher {
        pub fn install(_abort: AbortHandle) -> Result<Self> {
            Ok(Self)
        }

        pub fn finish(self) -> Option<TermSignal> {
            None
        }
    }

    pub fn terminate_self(signal: TermSignal) -> Result<()> {
        bail!("cannot re-deliver {} on this platform", signal.name())
    }

    pub fn forward(pid: u32, signal: TermSignal) -> Result<()> {
        bail!("cannot forward {} to pid {pid} on this platform", signal.name())
    }

    pub fn kill_hard(pid: u32) -> Result<()> {
        bail!("cannot kill pid {pid} on this platform")
    }
}
