//! Thin wrappers around `tracing` macros that compile to nothing when
//! the `tracing` feature is disabled, so instrumentation never forces
//! the dependency on downstream crates that don't want it.

#[cfg(feature = "tracing")]
macro_rules! sdk_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! sdk_trace {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! sdk_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! sdk_debug {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! sdk_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! sdk_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! sdk_error {
    ($($arg:tt)*) => { tracing::error!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! sdk_error {
    ($($arg:tt)*) => {};
}

pub(crate) use sdk_debug;
pub(crate) use sdk_error;
pub(crate) use sdk_trace;
pub(crate) use sdk_warn;
