//! Synchronization progress state machine.
//!
//! A provider keeps two counters: updates it still has to persist (or, while
//! restoring, to apply) and updates already handled in the current burst.
//! After every mutation the pair is evaluated into exactly one transition:
//!
//! | condition                        | transition          | counter effect          |
//! |----------------------------------|---------------------|-------------------------|
//! | pending == 0                     | `Synced`            | completed = 0           |
//! | completed == 0 && pending == 1   | `Started` (0.0)     | none                    |
//! | completed == pending             | `Finished` (1.0)    | pending = completed = 0 |
//! | otherwise                        | `Continued(c / p)`  | none                    |
//!
//! Within one burst the reported progress never decreases and ends with
//! `Finished` (followed by the synced notifications) or `Synced`.

/// Result of evaluating the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Nothing outstanding
    Synced,
    /// First update of a burst is pending
    Started,
    /// Every pending update of the burst has completed
    Finished,
    /// Burst in progress with the given completion ratio
    Continued(f64),
}

impl Transition {
    /// Whether this transition leaves the provider synchronized.
    pub fn is_synced(&self) -> bool {
        matches!(self, Transition::Synced | Transition::Finished)
    }

    /// Progress value carried by the transition, if any.
    pub fn progress(&self) -> Option<f64> {
        match self {
            Transition::Synced => None,
            Transition::Started => Some(0.0),
            Transition::Finished => Some(1.0),
            Transition::Continued(progress) => Some(*progress),
        }
    }
}

/// Pure evaluation of `(pending, completed)`.
pub fn evaluate(pending: usize, completed: usize) -> Transition {
    if pending == 0 {
        Transition::Synced
    } else if completed == 0 && pending == 1 {
        Transition::Started
    } else if completed == pending {
        Transition::Finished
    } else {
        Transition::Continued(completed as f64 / pending as f64)
    }
}

/// Pending/completed counters of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pending: usize,
    completed: usize,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for a provider that is about to restore: one phantom pending
    /// update keeps it unsynchronized until the stored keys are known.
    pub fn restoring() -> Self {
        Self {
            pending: 1,
            completed: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_synced(&self) -> bool {
        self.pending == 0
    }

    /// Account for `count` more updates to handle.
    pub fn add_pending(&mut self, count: usize) {
        self.pending += count;
    }

    /// Drop the phantom update added by [`SyncProgress::restoring`].
    pub fn release_phantom(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// One pending update has been handled.
    pub fn complete_one(&mut self) {
        self.completed += 1;
    }

    /// Forget the current burst. Returns `true` if it was unsynchronized.
    pub fn abort(&mut self) -> bool {
        let was_pending = self.pending != 0;
        self.pending = 0;
        self.completed = 0;
        was_pending
    }

    /// Evaluate the counters and apply the transition's counter effect.
    pub fn report(&mut self) -> Transition {
        let transition = evaluate(self.pending, self.completed);
        match transition {
            Transition::Synced => self.completed = 0,
            Transition::Finished => {
                self.pending = 0;
                self.completed = 0;
            }
            Transition::Started | Transition::Continued(_) => {}
        }
        transition
    }
}
