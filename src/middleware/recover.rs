//! Panic recovery.
//!
//! # How the stack trace is captured
//!
//! By the time `catch_unwind` hands us the payload the panicking frames are
//! gone, so the trace has to be taken while the panic is still on the stack.
//! A process-wide panic hook does that, but only for panics raised while a
//! [`Recover`] scope is being polled on the current thread:
//!
//! ```text
//! Scoped::poll        ← marks the thread as "inside a recover scope"
//!   catch_unwind      ← stops the unwind
//!     next.call(req)  ← panics
//!       panic hook    ← sees the mark, stores a backtrace in a thread-local
//! ```
//!
//! Unwinding is synchronous within one poll, so the thread-local is read on
//! the same thread right after `catch_unwind` returns. Panics outside any
//! scope go to whatever hook was installed before.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use futures::FutureExt;

use super::{Gas, Skipper};
use crate::error::Error;
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;

pub struct RecoverConfig {
    pub skipper: Option<Skipper>,
    /// Maximum length of the captured trace, in bytes.
    pub stack_size: usize,
    /// Keep the whole stack of the panicking thread, including the frames
    /// above the recover boundary (executor, transport).
    pub stack_all: bool,
    /// Do not log recovered panics.
    pub disable_print_stack: bool,
}

impl Default for RecoverConfig {
    fn default() -> Self {
        Self { skipper: None, stack_size: 4 << 10, stack_all: false, disable_print_stack: false }
    }
}

/// Turns panics in the rest of the chain into [`Error::Panic`].
pub struct Recover {
    config: RecoverConfig,
}

impl Recover {
    pub fn with_config(config: RecoverConfig) -> Self {
        install_hook();
        Self { config }
    }

    fn trim_stack(&self, mut stack: String) -> String {
        if !self.config.stack_all {
            if let Some(boundary) = stack.find("catch_unwind") {
                // Cut at the start of the line holding the boundary frame.
                let line_start = stack[..boundary].rfind('\n').map_or(0, |i| i + 1);
                stack.truncate(line_start);
            }
        }
        if stack.len() > self.config.stack_size {
            let mut end = self.config.stack_size;
            while !stack.is_char_boundary(end) {
                end -= 1;
            }
            stack.truncate(end);
        }
        stack
    }
}

impl Default for Recover {
    fn default() -> Self {
        Self::with_config(RecoverConfig::default())
    }
}

impl Gas for Recover {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            // The call itself sits inside the unwind boundary so a handler
            // that panics before returning its future is caught as well.
            let guarded = AssertUnwindSafe(async move { next.call(req).await }).catch_unwind();
            let payload = match (Scoped { inner: Box::pin(guarded) }).await {
                Ok(outcome) => return outcome,
                Err(payload) => payload,
            };

            let message = panic_message(payload.as_ref());
            let stack = LAST_TRACE.with(|slot| slot.borrow_mut().take()).map(|s| self.trim_stack(s));

            if !self.config.disable_print_stack {
                tracing::error!(
                    panic = %message,
                    stack = stack.as_deref().unwrap_or(""),
                    "recovered from panic",
                );
            }

            Err(Error::Panic { message, stack })
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}

/// Coerces a panic payload into a message.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<Error>() {
        e.to_string()
    } else {
        "unknown panic payload".to_owned()
    }
}

// ── Panic hook ────────────────────────────────────────────────────────────────

thread_local! {
    static SCOPE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if SCOPE_DEPTH.with(Cell::get) > 0 {
                let trace = Backtrace::force_capture().to_string();
                LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as inside a recover scope for each poll.
struct Scoped<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _depth = DepthGuard::enter();
        self.inner.as_mut().poll(cx)
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        SCOPE_DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        SCOPE_DEPTH.with(|d| d.set(d.get() - 1));
    }
}
