//! # Exactly-Once Span Termination
//!
//! Every component in this crate that opens a span must close it exactly once,
//! no matter which exit path the surrounding operation takes: success, error,
//! cancellation, or an early drop. [`SpanGuard`] is the single shared
//! discipline for that: it owns the [`Context`] carrying the active span,
//! terminates the span on [`SpanGuard::end`], turns any later termination
//! attempt into a no-op, and falls back to ending the span on drop so an
//! abandoned operation can never leak an open span.

use std::borrow::Cow;
use std::error::Error;

use opentelemetry::trace::{Status, TraceContextExt as _};
use opentelemetry::{Context, KeyValue};

/// Owns the termination of the span carried by a [`Context`].
///
/// The guard is created right after a span is started and attached to its
/// derived context. All span mutations go through the guard so that they are
/// silently dropped once the span has ended, and `end` itself is latched:
/// the first call terminates the span, every further call (including the one
/// performed by `Drop`) does nothing.
#[derive(Debug)]
pub struct SpanGuard {
    cx: Context,
    ended: bool,
}

impl SpanGuard {
    /// Wraps a context whose active span this guard becomes responsible for.
    pub fn new(cx: Context) -> Self {
        Self { cx, ended: false }
    }

    /// The span-bearing context owned by this guard.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Whether the span has already been terminated.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Records `error` as an exception event on the span.
    pub fn record_error(&self, error: &dyn Error) {
        if !self.ended {
            self.cx.span().record_error(error);
        }
    }

    /// Marks the span status as error with the given description.
    pub fn set_error_status(&self, description: impl Into<Cow<'static, str>>) {
        if !self.ended {
            self.cx.span().set_status(Status::error(description));
        }
    }

    /// Sets attributes on the span.
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        if !self.ended {
            for attribute in attributes {
                self.cx.span().set_attribute(attribute);
            }
        }
    }

    /// Terminates the span. Latched: only the first call has an effect.
    pub fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.cx.span().end();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.end();
    }
}
