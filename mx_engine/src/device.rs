use std::cell::Cell;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use thiserror::Error;

/// Number of compute devices the host backend exposes.
pub const DEVICE_COUNT: usize = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceOptions {
    pub ordinal: usize,
    /// Synchronise after every launch and log it (debugging aid).
    pub sync: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device {ordinal} not available ({available} device(s) present)")]
    NoSuchDevice { ordinal: usize, available: usize },
    #[error("kernel {kernel:?} launched off the device thread")]
    WrongThread { kernel: String },
}

/// Compute device bound to the thread that opened it.
///
/// Kernels only ever run through [`Device::launch`]. The handle is neither
/// `Send` nor `Sync`, so the thread that opened it is the only one that can
/// reach it.
#[derive(Debug)]
pub struct Device {
    ordinal: usize,
    sync: bool,
    owner: ThreadId,
    launches: Cell<u64>,
    _bound: PhantomData<*const ()>,
}

impl Device {
    pub fn open(options: DeviceOptions) -> Result<Self, DeviceError> {
        if options.ordinal >= DEVICE_COUNT {
            return Err(DeviceError::NoSuchDevice {
                ordinal: options.ordinal,
                available: DEVICE_COUNT,
            });
        }
        log::info!(
            "device {}: host backend{}",
            options.ordinal,
            if options.sync { " (sync)" } else { "" }
        );
        Ok(Self {
            ordinal: options.ordinal,
            sync: options.sync,
            owner: thread::current().id(),
            launches: Cell::new(0),
            _bound: PhantomData,
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn launches(&self) -> u64 {
        self.launches.get()
    }

    pub fn launch<R>(&self, kernel: &str, body: impl FnOnce() -> R) -> Result<R, DeviceError> {
        if thread::current().id() != self.owner {
            return Err(DeviceError::WrongThread {
                kernel: kernel.to_string(),
            });
        }
        let result = body();
        let count = self.launches.get() + 1;
        self.launches.set(count);
        if self.sync {
            log::debug!("device {}: {kernel} #{count} done", self.ordinal);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_ordinals_open() {
        assert!(Device::open(DeviceOptions::default()).is_ok());
        assert_eq!(
            Device::open(DeviceOptions {
                ordinal: 3,
                sync: false
            })
            .unwrap_err(),
            DeviceError::NoSuchDevice {
                ordinal: 3,
                available: DEVICE_COUNT
            }
        );
    }

    #[test]
    fn launches_are_counted() -> Result<(), DeviceError> {
        let device = Device::open(DeviceOptions {
            ordinal: 0,
            sync: true,
        })?;
        let sum = device.launch("sum", || 2 + 2)?;
        assert_eq!(sum, 4);
        device.launch("noop", || ())?;
        assert_eq!(device.launches(), 2);
        Ok(())
    }
}
