//! The minimal POSIX-flavored signal set SPEC_FULL.md fixes for spec.md
//! §4.7/§5, which mention `kill`, `sigaction`, pending masks, and
//! "uncaught signal" cancellation without enumerating a signal set.

use bitflags::bitflags;

/// A single signal number, kept small and closed rather than an open `u32`
/// so dispatch can exhaustively match delivery behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Kill,
    Term,
    Stop,
    Cont,
    Segv,
    Pipe,
    Chld,
    Usr1,
    Usr2,
}

impl Signal {
    /// `true` for signals a process cannot block, ignore, or catch
    /// (`SIGKILL`, `SIGSTOP`), mirroring POSIX.
    #[must_use]
    pub fn is_uncatchable(self) -> bool {
        matches!(self, Signal::Kill | Signal::Stop)
    }

    fn bit(self) -> SignalSet {
        match self {
            Signal::Kill => SignalSet::KILL,
            Signal::Term => SignalSet::TERM,
            Signal::Stop => SignalSet::STOP,
            Signal::Cont => SignalSet::CONT,
            Signal::Segv => SignalSet::SEGV,
            Signal::Pipe => SignalSet::PIPE,
            Signal::Chld => SignalSet::CHLD,
            Signal::Usr1 => SignalSet::USR1,
            Signal::Usr2 => SignalSet::USR2,
        }
    }
}

bitflags! {
    /// A set of pending or masked signals.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignalSet: u16 {
        const KILL = 1 << 0;
        const TERM = 1 << 1;
        const STOP = 1 << 2;
        const CONT = 1 << 3;
        const SEGV = 1 << 4;
        const PIPE = 1 << 5;
        const CHLD = 1 << 6;
        const USR1 = 1 << 7;
        const USR2 = 1 << 8;
    }
}

impl SignalSet {
    /// Marks `signal` pending, ignoring mask state (masking only affects
    /// delivery, never whether a signal can be recorded as pending).
    pub fn raise(&mut self, signal: Signal) {
        self.insert(signal.bit());
    }

    /// `true` if `signal` is currently pending.
    #[must_use]
    pub fn is_pending(self, signal: Signal) -> bool {
        self.contains(signal.bit())
    }

    /// Clears `signal` from the pending set, e.g. once delivered.
    pub fn clear(&mut self, signal: Signal) {
        self.remove(signal.bit());
    }

    /// Picks the next deliverable signal not in `mask`, preferring
    /// `SIGKILL`/`SIGSTOP` (uncatchable) over everything else since those
    /// can never be blocked.
    #[must_use]
    pub fn next_deliverable(self, mask: SignalSet) -> Option<Signal> {
        const ORDER: [Signal; 9] = [
            Signal::Kill,
            Signal::Stop,
            Signal::Term,
            Signal::Segv,
            Signal::Pipe,
            Signal::Chld,
            Signal::Cont,
            Signal::Usr1,
            Signal::Usr2,
        ];
        ORDER.into_iter().find(|&sig| {
            let uncatchable = sig.is_uncatchable();
            self.is_pending(sig) && (uncatchable || !mask.contains(sig.bit()))
        })
    }
}

/// The default action a signal takes when delivered without a custom
/// handler installed via `sigaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    /// Process exits immediately.
    Terminate,
    /// Process transitions to `Stopped`.
    Stop,
    /// A stopped process resumes running.
    Continue,
    /// No effect by default (e.g. `SIGCHLD` is usually just observed by
    /// `waitpid`).
    Ignore,
}

impl Signal {
    /// The action taken if no handler was installed via `sigaction`.
    #[must_use]
    pub fn default_action(self) -> DefaultAction {
        match self {
            Signal::Kill | Signal::Term | Signal::Segv | Signal::Pipe => DefaultAction::Terminate,
            Signal::Stop => DefaultAction::Stop,
            Signal::Cont => DefaultAction::Continue,
            Signal::Chld | Signal::Usr1 | Signal::Usr2 => DefaultAction::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_then_clear_round_trips() {
        let mut set = SignalSet::empty();
        set.raise(Signal::Term);
        assert!(set.is_pending(Signal::Term));
        set.clear(Signal::Term);
        assert!(!set.is_pending(Signal::Term));
    }

    #[test]
    fn kill_is_never_masked() {
        let mut pending = SignalSet::empty();
        pending.raise(Signal::Kill);
        let mask = SignalSet::all();
        assert_eq!(pending.next_deliverable(mask), Some(Signal::Kill));
    }

    #[test]
    fn masked_signal_is_not_delivered() {
        let mut pending = SignalSet::empty();
        pending.raise(Signal::Usr1);
        let mask = SignalSet::USR1;
        assert_eq!(pending.next_deliverable(mask), None);
    }

    #[test]
    fn default_actions_match_posix_conventions() {
        assert_eq!(Signal::Kill.default_action(), DefaultAction::Terminate);
        assert_eq!(Signal::Stop.default_action(), DefaultAction::Stop);
        assert_eq!(Signal::Chld.default_action(), DefaultAction::Ignore);
    }
}
