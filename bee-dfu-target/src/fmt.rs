// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Logging macros.
//!
//! Forward to `defmt` when the `defmt` feature is on, to the `log` facade when
//! `log` is on, and expand to nothing otherwise.

#![macro_use]
#![allow(unused_macros)]

macro_rules! log_with {
    ($defmt:ident, $log:ident, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$defmt!($s $(, $x)*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::$log!($s $(, $x)*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$x),*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { log_with!(trace, trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_with!(debug, debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_with!(println, info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_with!(warn, warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_with!(error, error, $($arg)*) };
}
