//! Interrupt discipline: nestable critical sections and an IRQ registry.
//!
//! Grounded in `satcat5/interrupts.h`. A process-wide, nestable critical
//! section (`AtomicLock`) is acquired on construction and released on
//! destruction (Rust's `Drop`, which runs on panic unwind too, giving the
//! "guaranteed release on all exit paths" contract for free). Only the
//! outermost `AtomicLock` in the nesting touches the platform primitive.

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};

thread_local! {
    static LOCK_DEPTH: Cell<u32> = Cell::new(0);
}

/// Host-primitive hook invoked only at the outermost lock/unlock. On bare
/// metal this disables/enables interrupts; on a hosted OS it is a mutex.
pub trait Platform {
    /// Disable interrupts / acquire the OS mutex.
    fn enter(&self);
    /// Re-enable interrupts / release the OS mutex.
    fn exit(&self);
}

/// A no-op platform suitable for single-threaded hosted tests, where
/// Rust's own borrow rules already prevent concurrent mutation.
#[derive(Default)]
pub struct NullPlatform;
impl Platform for NullPlatform {
    fn enter(&self) {}
    fn exit(&self) {}
}

/// Scoped critical-section guard. Nests: only the outermost instance in the
/// current thread touches the platform primitive.
pub struct AtomicLock<'p> {
    platform: &'p dyn Platform,
}

impl<'p> AtomicLock<'p> {
    /// Enter a (possibly nested) critical section.
    pub fn new(platform: &'p dyn Platform) -> Self {
        let depth = LOCK_DEPTH.with(|d| {
            let v = d.get();
            d.set(v + 1);
            v
        });
        if depth == 0 {
            platform.enter();
        }
        AtomicLock { platform }
    }
}

impl<'p> Drop for AtomicLock<'p> {
    fn drop(&mut self) {
        let depth = LOCK_DEPTH.with(|d| {
            let v = d.get() - 1;
            d.set(v);
            v
        });
        if depth == 0 {
            self.platform.exit();
        }
    }
}

/// Worst-case observed hold time for one lock or handler label, in
/// microseconds. Reset at startup and at the start of each unit test via
/// [`pre_test_reset`].
#[derive(Debug, Default)]
pub struct HoldTimeStats {
    worst_usec: AtomicU32,
}

impl HoldTimeStats {
    /// Record an observed hold time, updating the worst-case if exceeded.
    pub fn record(&self, usec: u32) {
        self.worst_usec.fetch_max(usec, Ordering::Relaxed);
    }

    /// Worst-case hold time observed so far.
    pub fn worst_usec(&self) -> u32 {
        self.worst_usec.load(Ordering::Relaxed)
    }

    /// Reset to zero.
    pub fn reset(&self) {
        self.worst_usec.store(0, Ordering::Relaxed);
    }
}

/// Callback bound to one IRQ line.
pub trait IrqHandler {
    /// Handle the interrupt. Must return in small, constant time; work that
    /// takes longer must `request_poll()` an associated `OnDemand` object.
    fn irq_event(&self);
}

/// Binds [`IrqHandler`]s to numeric IRQ lines.
pub struct IrqRegistry {
    handlers: Vec<Option<(u32, std::rc::Rc<dyn IrqHandler>, HoldTimeStats)>>,
}

impl IrqRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        IrqRegistry { handlers: Vec::new() }
    }

    /// Register a handler on the given line.
    pub fn irq_register(&mut self, line: u32, handler: std::rc::Rc<dyn IrqHandler>) {
        self.handlers.push((line, handler, HoldTimeStats::default()).into());
    }

    /// Remove the handler registered on the given line, if any.
    pub fn irq_unregister(&mut self, line: u32) {
        self.handlers.retain(|h| h.as_ref().map(|(l, ..)| *l != line).unwrap_or(true));
    }

    /// Dispatch the interrupt for the given line, if a handler is bound.
    /// Always followed by `irq_acknowledge` semantics at the platform
    /// layer (not modeled here; the platform shim issues that after this
    /// call returns).
    pub fn dispatch(&self, line: u32, elapsed_usec: u32) {
        for entry in self.handlers.iter().flatten() {
            let (l, handler, stats) = entry;
            if *l == line {
                handler.irq_event();
                stats.record(elapsed_usec);
            }
        }
    }
}

impl Default for IrqRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Hard-reset of process-wide interrupt statistics at the start of a unit
/// test. Returns true if state was already at its expected reset value.
pub fn pre_test_reset() -> bool {
    LOCK_DEPTH.with(|d| {
        let was_zero = d.get() == 0;
        d.set(0);
        was_zero
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_locks_only_enter_exit_once() {
        struct Counting {
            enters: Cell<u32>,
            exits: Cell<u32>,
        }
        impl Platform for Counting {
            fn enter(&self) {
                self.enters.set(self.enters.get() + 1);
            }
            fn exit(&self) {
                self.exits.set(self.exits.get() + 1);
            }
        }
        let p = Counting { enters: Cell::new(0), exits: Cell::new(0) };
        {
            let _outer = AtomicLock::new(&p);
            {
                let _inner = AtomicLock::new(&p);
            }
            assert_eq!(p.enters.get(), 1);
            assert_eq!(p.exits.get(), 0);
        }
        assert_eq!(p.exits.get(), 1);
    }

    #[test]
    fn hold_time_stats_track_worst_case() {
        let stats = HoldTimeStats::default();
        stats.record(10);
        stats.record(50);
        stats.record(20);
        assert_eq!(stats.worst_usec(), 50);
        stats.reset();
        assert_eq!(stats.worst_usec(), 0);
    }
}
