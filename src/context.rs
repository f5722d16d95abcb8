//! Policies for threading the trace context between steps.
//!
//! Every step span is opened as a child of the run's root span, so the tree
//! is always root → sequential siblings. The policies only differ in who owns
//! the "current context" variable between steps:
//!
//! - [`Propagation::Explicit`]: the step takes the context by value and hands
//!   back the context the next step should use.
//! - [`Propagation::SharedRef`]: the step receives a `&mut` [`ContextSlot`],
//!   points it at its own span while running and restores the parent on the
//!   way out.
//! - [`Propagation::ByValue`]: the step receives a copy, scopes that copy to
//!   its own span and never writes back.
//!
//! A step's span context is never carried into the next step, whichever
//! policy is chosen.

use serde::{Deserialize, Serialize};

use opentelemetry::Context;

/// How the current trace context moves across step boundaries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Pass the context in and return the next one.
    #[default]
    Explicit,
    /// Read and update one shared context holder in place.
    SharedRef,
    /// Pass an independent copy to each step.
    ByValue,
}

/// The context slot used by [`Propagation::SharedRef`].
///
/// While a step runs, [`ContextSlot::current`] holds the step's span; when
/// the step finishes the slot holds the run's root again.
#[derive(Debug, Clone)]
pub struct ContextSlot {
    current: Context,
}

impl ContextSlot {
    /// A slot holding `root`.
    pub fn new(root: Context) -> Self {
        Self { current: root }
    }

    /// The context new spans should be parented to right now.
    pub fn current(&self) -> &Context {
        &self.current
    }

    /// Point the slot at `scope`, returning what it held before.
    pub fn enter(&mut self, scope: Context) -> Context {
        std::mem::replace(&mut self.current, scope)
    }

    /// Restore a context previously returned by [`ContextSlot::enter`].
    pub fn restore(&mut self, previous: Context) {
        self.current = previous;
    }
}
