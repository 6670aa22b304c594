// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Simulated scheduler for the manager task

use core::cell::{Cell, Ref, RefCell, RefMut};

use crate::traits::{ContextSwitchHook, TaskControl};

/// Scheduler double driving a [`ContextSwitchHook`]
///
/// The simulated manager task is always the caller. Every yield or delay
/// switches it out to some other task and back in, firing the hook for both
/// switches, exactly as a preemptive kernel would around a blocking call.
#[derive(Debug)]
pub struct SimTaskControl<H> {
    hook: RefCell<H>,
    ticks: Cell<u32>,
    yields: Cell<u32>,
    delays: Cell<u32>,
    elapsed_ms: Cell<u32>,
    critical_sections: Cell<u32>,
}

impl<H: ContextSwitchHook> SimTaskControl<H> {
    /// Create a scheduler driving `hook`
    pub fn new(hook: H) -> Self {
        Self {
            hook: RefCell::new(hook),
            ticks: Cell::new(0),
            yields: Cell::new(0),
            delays: Cell::new(0),
            elapsed_ms: Cell::new(0),
            critical_sections: Cell::new(0),
        }
    }

    /// Borrow the hook
    pub fn hook(&self) -> Ref<'_, H> {
        self.hook.borrow()
    }

    /// Mutably borrow the hook
    pub fn hook_mut(&self) -> RefMut<'_, H> {
        self.hook.borrow_mut()
    }

    /// Switch the manager task in, as the scheduler does when it first runs
    pub fn switch_in(&self) {
        self.hook.borrow_mut().on_context_switch(true, false);
    }

    /// Switch the manager task out
    pub fn switch_out(&self) {
        self.hook.borrow_mut().on_context_switch(false, true);
    }

    /// Switch between two tasks that are not the manager
    pub fn switch_between_others(&self) {
        self.hook.borrow_mut().on_context_switch(false, false);
    }

    /// Number of yields performed
    pub fn yield_count(&self) -> u32 {
        self.yields.get()
    }

    /// Number of delays performed
    pub fn delay_count(&self) -> u32 {
        self.delays.get()
    }

    /// Total simulated sleep time
    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms.get()
    }

    /// Number of critical sections entered
    pub fn critical_section_count(&self) -> u32 {
        self.critical_sections.get()
    }

    fn round_trip(&self, ticks: u32) {
        self.switch_out();
        self.switch_between_others();
        self.ticks.set(self.ticks.get().wrapping_add(ticks));
        self.switch_in();
    }
}

impl<H: ContextSwitchHook> TaskControl for SimTaskControl<H> {
    fn yield_now(&self) {
        self.yields.set(self.yields.get() + 1);
        self.round_trip(1);
    }

    fn delay_ms(&self, ms: u32) {
        self.delays.set(self.delays.get() + 1);
        self.elapsed_ms.set(self.elapsed_ms.get().saturating_add(ms));
        self.round_trip(ms.max(1));
    }

    fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        self.critical_sections.set(self.critical_sections.get() + 1);
        f()
    }

    fn ticks(&self) -> u32 {
        self.ticks.get()
    }
}
