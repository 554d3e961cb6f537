//! Scoped ownership of device connections
//!
//! Every connection opened for a session is wrapped in [`Connected`], which
//! disconnects the device when dropped. Sessions that abort on an error
//! therefore still release both the interferometers and the controller.

use std::fmt;
use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

/// A device connection that can be closed.
pub trait Disconnect {
    type Error: std::error::Error;

    /// Close the connection. Called at most once by [`Connected`].
    fn disconnect(&mut self) -> Result<(), Self::Error>;
}

/// Exclusive owner of an open device connection.
///
/// Dereferences to the device. On drop, the device is disconnected unless
/// [`close`](Self::close) already did so; drop-time failures are logged.
pub struct Connected<T: Disconnect> {
    device: T,
    label: String,
    open: bool,
}

impl<T: Disconnect> Connected<T> {
    /// Take ownership of an already connected device.
    pub fn new(label: impl Into<String>, device: T) -> Self {
        Self {
            device,
            label: label.into(),
            open: true,
        }
    }

    /// Name used in log messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Disconnect now and report the outcome.
    pub fn close(&mut self) -> Result<(), T::Error> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        debug!("Closing {}", self.label);
        self.device.disconnect()
    }
}

impl<T: Disconnect> fmt::Debug for Connected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("label", &self.label)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl<T: Disconnect> Deref for Connected<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.device
    }
}

impl<T: Disconnect> DerefMut for Connected<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.device
    }
}

impl<T: Disconnect> Drop for Connected<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Disconnect of {} on drop failed: {}", self.label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    #[error("socket already gone")]
    struct SocketGone;

    struct Probe {
        closes: Rc<Cell<u32>>,
        fail: bool,
    }

    impl Disconnect for Probe {
        type Error = SocketGone;

        fn disconnect(&mut self) -> Result<(), SocketGone> {
            self.closes.set(self.closes.get() + 1);
            if self.fail {
                Err(SocketGone)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_drop_disconnects() {
        let closes = Rc::new(Cell::new(0));
        {
            let _conn = Connected::new("probe", Probe { closes: closes.clone(), fail: false });
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_explicit_close_is_not_repeated_on_drop() {
        let closes = Rc::new(Cell::new(0));
        {
            let mut conn = Connected::new("probe", Probe { closes: closes.clone(), fail: false });
            conn.close().unwrap();
            assert!(!conn.is_open());
            conn.close().unwrap();
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_close_error_passes_through() {
        let closes = Rc::new(Cell::new(0));
        let mut conn = Connected::new("IDS 207", Probe { closes, fail: true });

        let err = conn.close().unwrap_err();

        assert_eq!(err, SocketGone);
        assert!(!conn.is_open());
    }

    #[test]
    fn test_debug_shows_label_and_state() {
        let closes = Rc::new(Cell::new(0));
        let mut conn = Connected::new("IDS 206", Probe { closes, fail: false });
        conn.close().unwrap();

        let text = format!("{conn:?}");

        assert!(text.contains("\"IDS 206\""), "{text}");
        assert!(text.contains("open: false"), "{text}");
    }

    #[test]
    fn test_drop_during_unwind_disconnects() {
        let closes = Rc::new(Cell::new(0));
        let inner = closes.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _conn = Connected::new("probe", Probe { closes: inner, fail: false });
            panic!("tick failed");
        }));
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);
    }
}
