//! Cooperative single-threaded polling runtime.
//!
//! Grounded in `satcat5/polling.h`: three event classes (`Always`,
//! `OnDemand`, `Timer`), each serviced from a registry owned by a
//! [`PollContext`] rather than a global intrusive list — the re-expression
//! called for in the original design notes. Registration returns a
//! [`PollHandle`] whose `Drop` deregisters, so callers cannot forget to
//! unlink before the registered object is destroyed.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Polled once per outer [`PollContext::service`] pass, in registration
/// order.
pub trait Always {
    /// Run one step of work. Must return promptly; long work must be
    /// sliced across iterations.
    fn poll_always(&self);
}

/// Polled only after [`PollContext::request_poll`] has been called for this
/// handler; requests are idempotent while pending.
pub trait OnDemand {
    /// Run one step of deferred work.
    fn poll_demand(&self);
}

/// Polled once per millisecond tick.
pub trait Timer {
    /// Timer has fired; `overshoot_msec` is how late the tick source was
    /// relative to the timer's nominal period.
    fn timer_event(&self, overshoot_msec: u32);
}

enum Slot<T: ?Sized> {
    Empty,
    Occupied(Rc<T>),
}

struct Registry<T: ?Sized> {
    slots: RefCell<Vec<Slot<T>>>,
}

impl<T: ?Sized> Registry<T> {
    fn new() -> Self {
        Registry {
            slots: RefCell::new(Vec::new()),
        }
    }

    fn register(&self, item: Rc<T>) -> usize {
        let mut slots = self.slots.borrow_mut();
        for (i, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Empty) {
                *slot = Slot::Occupied(item);
                return i;
            }
        }
        slots.push(Slot::Occupied(item));
        slots.len() - 1
    }

    fn unregister(&self, index: usize) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(index) {
            *slot = Slot::Empty;
        }
    }

    fn snapshot(&self) -> Vec<Rc<T>> {
        self.slots
            .borrow()
            .iter()
            .filter_map(|s| match s {
                Slot::Occupied(rc) => Some(Rc::clone(rc)),
                Slot::Empty => None,
            })
            .collect()
    }
}

struct TimerSlot {
    handler: Weak<dyn Timer>,
    remaining_msec: RefCell<u32>,
    period_msec: u32,
}

/// Owns the Always/OnDemand/Timer registries for one runtime instance.
///
/// Intentionally not `Sync`: the design is single-threaded cooperative
/// scheduling (§5). Multiple independent stacks in one process each get
/// their own `PollContext`.
pub struct PollContext {
    always: Registry<dyn Always>,
    ondemand: Registry<dyn OnDemand>,
    pending: RefCell<Vec<usize>>,
    timers: RefCell<Vec<Option<TimerSlot>>>,
    servicing: RefCell<bool>,
}

/// RAII handle for a registration; deregisters on drop.
pub struct PollHandle<'ctx, T: ?Sized> {
    ctx: &'ctx PollContext,
    index: usize,
    kind: HandleKind,
    _marker: std::marker::PhantomData<&'ctx T>,
}

enum HandleKind {
    Always,
    OnDemand,
    Timer,
}

impl<'ctx, T: ?Sized> Drop for PollHandle<'ctx, T> {
    fn drop(&mut self) {
        match self.kind {
            HandleKind::Always => self.ctx.always.unregister(self.index),
            HandleKind::OnDemand => self.ctx.ondemand.unregister(self.index),
            HandleKind::Timer => {
                if let Some(slot) = self.ctx.timers.borrow_mut().get_mut(self.index) {
                    *slot = None;
                }
            }
        }
    }
}

impl PollContext {
    /// Create an empty polling context.
    pub fn new() -> Self {
        PollContext {
            always: Registry::new(),
            ondemand: Registry::new(),
            pending: RefCell::new(Vec::new()),
            timers: RefCell::new(Vec::new()),
            servicing: RefCell::new(false),
        }
    }

    /// Register an `Always` handler.
    pub fn register_always(&self, item: Rc<dyn Always>) -> PollHandle<'_, dyn Always> {
        let index = self.always.register(item);
        PollHandle {
            ctx: self,
            index,
            kind: HandleKind::Always,
            _marker: std::marker::PhantomData,
        }
    }

    /// Register an `OnDemand` handler.
    pub fn register_ondemand(&self, item: Rc<dyn OnDemand>) -> PollHandle<'_, dyn OnDemand> {
        let index = self.ondemand.register(item);
        PollHandle {
            ctx: self,
            index,
            kind: HandleKind::OnDemand,
            _marker: std::marker::PhantomData,
        }
    }

    /// Request that the given `OnDemand` index be polled on the next pass.
    /// Idempotent while already pending.
    pub fn request_poll(&self, handle: &PollHandle<'_, dyn OnDemand>) {
        let mut pending = self.pending.borrow_mut();
        if !pending.contains(&handle.index) {
            pending.push(handle.index);
        }
    }

    /// Register a repeating or one-shot timer. `period_msec == 0` means
    /// one-shot.
    pub fn register_timer(
        &self,
        item: Rc<dyn Timer>,
        period_msec: u32,
    ) -> PollHandle<'_, dyn Timer> {
        let mut timers = self.timers.borrow_mut();
        let slot = TimerSlot {
            handler: Rc::downgrade(&item),
            remaining_msec: RefCell::new(period_msec.max(1)),
            period_msec,
        };
        for (i, s) in timers.iter_mut().enumerate() {
            if s.is_none() {
                *s = Some(slot);
                return PollHandle {
                    ctx: self,
                    index: i,
                    kind: HandleKind::Timer,
                    _marker: std::marker::PhantomData,
                };
            }
        }
        timers.push(Some(slot));
        let index = timers.len() - 1;
        PollHandle {
            ctx: self,
            index,
            kind: HandleKind::Timer,
            _marker: std::marker::PhantomData,
        }
    }

    /// Advance all timers by `elapsed_msec`, firing any whose remaining
    /// count reaches zero. Firing order is registration order (matches
    /// §5's ordering guarantee). Overshoot is clamped so repeating timers
    /// reload to at least 1 ms, preventing drift accumulation.
    pub fn tick_timers(&self, elapsed_msec: u32) {
        let timers = self.timers.borrow();
        for slot in timers.iter().flatten() {
            let mut remaining = slot.remaining_msec.borrow_mut();
            if elapsed_msec < *remaining {
                *remaining -= elapsed_msec;
                continue;
            }
            let overshoot = elapsed_msec - *remaining;
            if let Some(handler) = slot.handler.upgrade() {
                handler.timer_event(overshoot);
            }
            if slot.period_msec == 0 {
                *remaining = u32::MAX; // one-shot: effectively disabled until re-registered
            } else {
                let reload = slot.period_msec.saturating_sub(overshoot % slot.period_msec.max(1));
                *remaining = reload.max(1);
            }
        }
    }

    /// Run the Always list exactly once, then drain the currently queued
    /// OnDemand items. Re-entrant: a nested call to `service()` from inside
    /// an `Always`/`OnDemand` callback detaches the pending queue first, so
    /// re-entry sees a fresh queue and no item is visited twice or lost.
    pub fn service(&self) {
        for item in self.always.snapshot() {
            item.poll_always();
        }
        self.drain_ondemand();
    }

    /// Repeat [`Self::service`] until the OnDemand queue is empty or
    /// `limit` passes have elapsed.
    pub fn service_all(&self, limit: usize) {
        for _ in 0..limit {
            self.service();
            if self.pending.borrow().is_empty() {
                break;
            }
        }
    }

    fn drain_ondemand(&self) {
        // Detach the pending queue into a local sublist before iterating,
        // so a handler that calls request_poll() on itself (or is
        // re-queued by a recursive service() call) is scheduled for the
        // *next* pass rather than revisited in this one.
        let was_servicing = *self.servicing.borrow();
        *self.servicing.borrow_mut() = true;
        let local: Vec<usize> = self.pending.borrow_mut().drain(..).collect();
        for index in local {
            // Re-borrow per iteration (not held across the virtual call) so
            // a handler invoked here may itself call request_poll() or
            // service() without deadlocking on the RefCell.
            let item = match self.ondemand.slots.borrow().get(index) {
                Some(Slot::Occupied(rc)) => Some(Rc::clone(rc)),
                _ => None,
            };
            if let Some(item) = item {
                item.poll_demand();
            }
        }
        *self.servicing.borrow_mut() = was_servicing;
    }
}

impl Default for PollContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingAlways {
        count: Cell<u32>,
    }
    impl Always for CountingAlways {
        fn poll_always(&self) {
            self.count.set(self.count.get() + 1);
        }
    }

    #[test]
    fn always_runs_once_per_service_call() {
        let ctx = PollContext::new();
        let h = Rc::new(CountingAlways { count: Cell::new(0) });
        let _handle = ctx.register_always(h.clone());
        ctx.service();
        ctx.service();
        assert_eq!(h.count.get(), 2);
    }

    struct CountingTimer {
        fired: Cell<u32>,
    }
    impl Timer for CountingTimer {
        fn timer_event(&self, _overshoot_msec: u32) {
            self.fired.set(self.fired.get() + 1);
        }
    }

    #[test]
    fn timer_fires_after_period_elapses() {
        let ctx = PollContext::new();
        let t = Rc::new(CountingTimer { fired: Cell::new(0) });
        let _handle = ctx.register_timer(t.clone(), 10);
        ctx.tick_timers(5);
        assert_eq!(t.fired.get(), 0);
        ctx.tick_timers(5);
        assert_eq!(t.fired.get(), 1);
    }

    #[test]
    fn drop_deregisters() {
        let ctx = PollContext::new();
        let h = Rc::new(CountingAlways { count: Cell::new(0) });
        {
            let _handle = ctx.register_always(h.clone());
            ctx.service();
        }
        ctx.service();
        assert_eq!(h.count.get(), 1);
    }
}
