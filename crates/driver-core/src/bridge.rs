//! Capability bridge for the curtain motor
//!
//! Maps the `windowcoverings_set` fraction (0.0 closed, 1.0 open) to Window
//! Covering commands and lift percentage reports back to the fraction. Reports
//! that echo a set issued from here are held back while the echo window is
//! armed, so the slider does not jump while the motor is still travelling.

use crate::error::DeviceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use zcl_frames::WindowCoveringCommand;

/// Single shared echo window, re-armed by every local set
pub struct EchoSuppressor {
    window: Duration,
    armed_until: Mutex<Option<Instant>>,
}

impl EchoSuppressor {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed_until: Mutex::new(None),
        }
    }

    /// Arm or refresh the window from `now`
    pub fn arm(&self, now: Instant) {
        *self.lock() = Some(now + self.window);
    }

    /// Should a report arriving at `now` be suppressed?
    ///
    /// A suppressed report keeps the window open for another full period.
    pub fn suppress(&self, now: Instant) -> bool {
        let mut armed_until = self.lock();
        match *armed_until {
            Some(deadline) if now < deadline => {
                *armed_until = Some(now + self.window);
                true
            }
            Some(_) => {
                *armed_until = None;
                false
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_armed(&self, now: Instant) -> bool {
        matches!(*self.lock(), Some(deadline) if now < deadline)
    }

    pub fn disarm(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.armed_until.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a `windowcoverings_set` value turns into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiftSet {
    pub command: WindowCoveringCommand,
    /// Value to write back to the capability right away (full open/close only)
    pub immediate: Option<f64>,
}

/// Outcome of a lift percentage report
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiftReport {
    /// Update the capability
    Value(f64),
    /// Echo of a local set
    Suppressed,
    /// Outside 0..=100
    Invalid,
}

/// Lift fraction bridge with optional inversion
pub struct LiftBridge {
    inverted: AtomicBool,
    echo: EchoSuppressor,
}

impl LiftBridge {
    #[must_use]
    pub fn new(echo_window: Duration) -> Self {
        Self {
            inverted: AtomicBool::new(false),
            echo: EchoSuppressor::new(echo_window),
        }
    }

    pub fn set_inverted(&self, inverted: bool) {
        self.inverted.store(inverted, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.inverted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn echo(&self) -> &EchoSuppressor {
        &self.echo
    }

    /// Translate a capability value into a device command
    ///
    /// Fully open and fully closed use the dedicated commands so the motor
    /// always runs to its end stop; inversion does not apply to them.
    pub fn to_device(&self, value: f64, now: Instant) -> Result<LiftSet, DeviceError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(DeviceError::InvalidValue {
                capability: crate::capability::WINDOWCOVERINGS_SET.to_string(),
                value: value.to_string(),
            });
        }

        self.echo.arm(now);

        if value == 1.0 || value == 0.0 {
            let command = if value == 1.0 {
                WindowCoveringCommand::UpOpen
            } else {
                WindowCoveringCommand::DownClose
            };
            return Ok(LiftSet {
                command,
                immediate: Some(value),
            });
        }

        let fraction = if self.is_inverted() { 1.0 - value } else { value };
        // Rounded, some motors reject fractional percentages
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percentage = (fraction * 100.0).round() as u8;
        Ok(LiftSet {
            command: WindowCoveringCommand::GoToLiftPercentage { percentage },
            immediate: None,
        })
    }

    /// Translate a `currentPositionLiftPercentage` report
    pub fn from_device(&self, raw: i64, now: Instant) -> LiftReport {
        if !(0..=100).contains(&raw) {
            return LiftReport::Invalid;
        }
        let percentage = if self.is_inverted() { 100 - raw } else { raw };
        if self.echo.suppress(now) {
            return LiftReport::Suppressed;
        }
        LiftReport::Value(percentage as f64 / 100.0)
    }
}

/// `windowCoverStatus` report to `windowcoverings_state` value
#[must_use]
pub fn cover_status_state(status: &str) -> Option<&'static str> {
    match status {
        "Open" => Some("up"),
        "Stop" => Some("idle"),
        "Close" => Some("down"),
        _ => None,
    }
}
