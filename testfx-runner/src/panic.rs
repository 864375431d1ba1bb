// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Catching panics from test bodies.
//!
//! A backtrace taken after the unwind only shows the runner. The hook installed here captures one
//! at the panic site instead, on threads currently running a body under [`catch_body_panic`].
//! Panics elsewhere go to the previously installed hook.

use crate::node::TestFailure;
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    panic::{self, AssertUnwindSafe},
    sync::Once,
};

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.get() {
                let backtrace = Backtrace::force_capture().to_string();
                BACKTRACE.set(Some(backtrace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Runs `f`, turning a panic into an error carrying the panic message and the backtrace at the
/// panic site.
pub(crate) fn catch_body_panic<T>(f: impl FnOnce() -> T) -> Result<T, TestFailure> {
    install_hook();

    let was_capturing = CAPTURING.replace(true);
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.set(was_capturing);

    result.map_err(|payload| {
        let failure = TestFailure::error(panic_message(payload.as_ref()));
        match BACKTRACE.take() {
            Some(backtrace) => failure.with_stack_trace(backtrace),
            None => failure,
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("test panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("test panicked: {message}")
    } else {
        "test panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[inline(never)]
    fn divide_checked(divisor: u32) -> u32 {
        assert!(divisor != 0, "divisor is zero");
        100 / divisor
    }

    #[test]
    fn captures_panic_site() {
        let failure = catch_body_panic(|| divide_checked(0)).unwrap_err();
        assert_eq!(failure.message(), "test panicked: divisor is zero");

        let stack_trace = failure.stack_trace().expect("backtrace is always captured");
        assert!(
            stack_trace.contains("divide_checked"),
            "panicking frame in:\n{stack_trace}"
        );

        // Nothing leaks into the next call.
        assert_eq!(catch_body_panic(|| divide_checked(4)).unwrap(), 25);
        assert_eq!(BACKTRACE.take(), None);
        assert!(!CAPTURING.get());
    }

    #[test]
    fn non_string_payload() {
        let failure = catch_body_panic::<()>(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(failure.message(), "test panicked");
    }
}
