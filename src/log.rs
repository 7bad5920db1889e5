//! Logging shims forwarding to `tracing` if the corresponding feature
//! is enabled.

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($args:tt)*) => {
        tracing::trace!($($args)*)
    };
}

#[cfg(feature = "tracing")]
macro_rules! debug {
    ($($args:tt)*) => {
        tracing::debug!($($args)*)
    };
}

#[cfg(feature = "tracing")]
macro_rules! info {
    ($($args:tt)*) => {
        tracing::info!($($args)*)
    };
}

#[cfg(feature = "tracing")]
macro_rules! warn_ {
    ($($args:tt)*) => {
        tracing::warn!($($args)*)
    };
}

#[cfg(feature = "tracing")]
macro_rules! error {
    ($($args:tt)*) => {
        tracing::error!($($args)*)
    };
}

// Without `tracing` we still type check the format string and its
// arguments, but never evaluate anything.
#[cfg(not(feature = "tracing"))]
macro_rules! noop {
    ($($args:tt)*) => {{
        if false {
            let _args = format_args!($($args)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($args:tt)*) => {
        $crate::log::noop!($($args)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($args:tt)*) => {
        $crate::log::noop!($($args)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! info {
    ($($args:tt)*) => {
        $crate::log::noop!($($args)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_ {
    ($($args:tt)*) => {
        $crate::log::noop!($($args)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! error {
    ($($args:tt)*) => {
        $crate::log::noop!($($args)*)
    };
}

#[cfg(not(feature = "tracing"))]
pub(crate) use noop;

pub(crate) use debug;
pub(crate) use error;
pub(crate) use info;
pub(crate) use trace;
// `warn` on its own is ambiguous with the built-in attribute.
pub(crate) use warn_ as warn;
