use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::digital::{ErrorType, OutputPin};
use tracing::info;

use super::Level;

/// Output pin for hosts without GPIO: keeps the level and logs changes.
///
/// Clones share the same level, so a clone can observe what the owner wrote.
#[derive(Debug, Clone)]
pub struct LogPin {
    name: &'static str,
    id: u8,
    high: Arc<AtomicBool>,
}

impl LogPin {
    pub fn new(name: &'static str, id: u8) -> Self {
        Self {
            name,
            id,
            high: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn level(&self) -> Level {
        if self.high.load(Ordering::Acquire) {
            Level::High
        } else {
            Level::Low
        }
    }

    fn write(&self, high: bool) {
        let was_high = self.high.swap(high, Ordering::AcqRel);
        if was_high != high {
            info!(
                "Output {} (pin {}) -> {}",
                self.name,
                self.id,
                if high { "HIGH" } else { "LOW" }
            );
        }
    }
}

impl ErrorType for LogPin {
    type Error = Infallible;
}

impl OutputPin for LogPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}
