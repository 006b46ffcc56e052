use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Logging wrappers: compile to nothing without the `tracing` feature.

macro_rules! trace {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] ::tracing::trace!($($arg)*);}
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] ::tracing::debug!($($arg)*);}
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] ::tracing::info!($($arg)*);}
    };
}

macro_rules! log_warn {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] ::tracing::warn!($($arg)*);}
    };
}

macro_rules! error {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] ::tracing::error!($($arg)*);}
    };
}

pub(crate) use {debug, error, info, trace};
pub(crate) use log_warn as warn;

// Poison-tolerant lock access.

pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
