//! Logging macros
//!
//! The same call sites compile against three backends:
//! - `defmt` feature: forwarded to `defmt`
//! - `std` feature: printed to stdout with a level prefix
//! - neither: arguments are type-checked and dropped
//!
//! Format strings stick to `{}`, `{:?}` and `{:X}` so they are valid for both
//! `defmt` and `core::fmt`.
#![allow(unused_macros)]

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::std::println!("[TRACE] {}", ::core::format_args!($($arg)*));
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::std::println!("[DEBUG] {}", ::core::format_args!($($arg)*));
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::std::println!("[INFO] {}", ::core::format_args!($($arg)*));
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::std::println!("[WARN] {}", ::core::format_args!($($arg)*));
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::std::eprintln!("[ERROR] {}", ::core::format_args!($($arg)*));
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}
