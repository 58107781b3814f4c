//! # Display Boundary
//!
//! The controller drives a five-digit seven-segment readout, an accent colour
//! and a status line. Rendering lives outside this crate; [`Display`] is the
//! whole surface.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Timestamp;

/// 24-bit colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

impl Rgb {
    /// Standby / idle accent.
    pub const BRAND_RED: Self = Self::from_hex(0x00E4_032E);
    /// Round pending / finished accent.
    pub const BRAND_YELLOW: Self = Self::from_hex(0x00C5_C405);

    /// Builds a colour from `0xRRGGBB`.
    #[must_use]
    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: (hex >> 16) as u8,
            g: (hex >> 8) as u8,
            b: hex as u8,
        }
    }

    /// Linear blend, `t` in `0..=127`.
    #[must_use]
    fn blend(self, other: Self, t: u8) -> Self {
        let t = u16::from(t.min(127));
        let mix = |a: u8, b: u8| ((u16::from(a) * (127 - t) + u16::from(b) * t) / 127) as u8;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
        }
    }

    /// Open-race accent: red to yellow and back on a 512 ms cycle.
    #[must_use]
    pub fn urgency_pulse(now: Timestamp) -> Self {
        let phase = ((now.as_millis() >> 1) % 256) as u8;
        if phase < 128 {
            Self::BRAND_RED.blend(Self::BRAND_YELLOW, phase)
        } else {
            Self::BRAND_YELLOW.blend(Self::BRAND_RED, phase - 128)
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Content of the five-digit readout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigitReadout {
    /// Time value with a decimal point.
    Elapsed {
        /// Five-digit value, `0..=99_999`.
        value: u32,
        /// Digits to the right of the decimal point.
        decimal_point: u8,
    },
    /// Single centred countdown digit.
    Countdown(u8),
    /// All segments off.
    Blank,
    /// Value too large to show.
    Overflow,
}

impl DigitReadout {
    /// Maps milliseconds onto the readout, dropping precision as the value
    /// grows: `S.mmm`/`SS.mmm`, `SSS.cc`, `SSSS.d`.
    #[must_use]
    pub fn elapsed(ms: u64) -> Self {
        let (value, decimal_point) = match ms {
            0..=99_999 => (ms, 3),
            100_000..=999_999 => (ms / 10, 2),
            1_000_000..=9_999_999 => (ms / 100, 1),
            _ => return Self::Overflow,
        };
        Self::Elapsed {
            // At most 99_999 by the ranges above.
            value: value as u32,
            decimal_point,
        }
    }
}

impl fmt::Display for DigitReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Elapsed { value, decimal_point } => {
                let scale = 10u32.pow(u32::from(decimal_point));
                write!(
                    f,
                    "{}.{:0width$}",
                    value / scale,
                    value % scale,
                    width = usize::from(decimal_point)
                )
            }
            Self::Countdown(n) => write!(f, "{n}"),
            Self::Blank => Ok(()),
            Self::Overflow => write!(f, "-----"),
        }
    }
}

/// Narrow output interface the controller drives.
pub trait Display {
    /// Renders the digit readout.
    fn show_digits(&mut self, readout: DigitReadout);
    /// Sets the urgency accent.
    fn set_accent_color(&mut self, color: Rgb);
    /// Shows operator/player status text.
    fn show_message(&mut self, text: &str);
}

/// Something shown on a [`RecordingDisplay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    /// [`Display::show_digits`].
    Digits(DigitReadout),
    /// [`Display::set_accent_color`].
    Accent(Rgb),
    /// [`Display::show_message`].
    Message(String),
}

/// Display that records everything; clones share the log.
#[derive(Clone, Debug, Default)]
pub struct RecordingDisplay {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
}

impl RecordingDisplay {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event.
    #[must_use]
    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().clone()
    }

    /// Messages in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::Message(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Most recent message.
    #[must_use]
    pub fn last_message(&self) -> Option<String> {
        self.messages().pop()
    }

    /// Most recent digit readout.
    #[must_use]
    pub fn last_digits(&self) -> Option<DigitReadout> {
        self.events.lock().iter().rev().find_map(|e| match e {
            DisplayEvent::Digits(readout) => Some(*readout),
            _ => None,
        })
    }

    /// Drops the log.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Display for RecordingDisplay {
    fn show_digits(&mut self, readout: DigitReadout) {
        self.events.lock().push(DisplayEvent::Digits(readout));
    }

    fn set_accent_color(&mut self, color: Rgb) {
        self.events.lock().push(DisplayEvent::Accent(color));
    }

    fn show_message(&mut self, text: &str) {
        self.events.lock().push(DisplayEvent::Message(text.to_owned()));
    }
}

/// Display that writes to `tracing`, for headless runs.
#[derive(Debug, Default)]
pub struct TracingDisplay {
    last_digits: Option<DigitReadout>,
}

impl Display for TracingDisplay {
    fn show_digits(&mut self, readout: DigitReadout) {
        if self.last_digits != Some(readout) {
            tracing::trace!(digits = %readout, "display");
            self.last_digits = Some(readout);
        }
    }

    fn set_accent_color(&mut self, color: Rgb) {
        tracing::trace!(accent = %color, "display");
    }

    fn show_message(&mut self, text: &str) {
        tracing::info!(message = text, "display");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readout_ranges() {
        assert_eq!(
            DigitReadout::elapsed(1420),
            DigitReadout::Elapsed {
                value: 1420,
                decimal_point: 3
            }
        );
        assert_eq!(
            DigitReadout::elapsed(99_999),
            DigitReadout::Elapsed {
                value: 99_999,
                decimal_point: 3
            }
        );
        assert_eq!(
            DigitReadout::elapsed(123_456),
            DigitReadout::Elapsed {
                value: 12_345,
                decimal_point: 2
            }
        );
        assert_eq!(
            DigitReadout::elapsed(1_234_567),
            DigitReadout::Elapsed {
                value: 12_345,
                decimal_point: 1
            }
        );
        assert_eq!(DigitReadout::elapsed(10_000_000), DigitReadout::Overflow);
    }

    #[test]
    fn test_readout_text() {
        assert_eq!(DigitReadout::elapsed(1420).to_string(), "1.420");
        assert_eq!(DigitReadout::elapsed(123_456).to_string(), "123.45");
        assert_eq!(DigitReadout::elapsed(5).to_string(), "0.005");
        assert_eq!(DigitReadout::Countdown(3).to_string(), "3");
    }

    #[test]
    fn test_pulse_endpoints() {
        assert_eq!(Rgb::urgency_pulse(Timestamp(0)), Rgb::BRAND_RED);
        assert_eq!(Rgb::urgency_pulse(Timestamp(254)), Rgb::BRAND_YELLOW);
        assert_eq!(Rgb::urgency_pulse(Timestamp(256)), Rgb::BRAND_YELLOW);
        assert_eq!(Rgb::urgency_pulse(Timestamp(512)), Rgb::BRAND_RED);
        assert_eq!(Rgb::BRAND_RED.to_string(), "#e4032e");
    }

    #[test]
    fn test_recording_display_shared() {
        let display = RecordingDisplay::new();
        let mut handle = display.clone();
        handle.show_message("Round 1");
        handle.show_digits(DigitReadout::Blank);
        assert_eq!(display.last_message().as_deref(), Some("Round 1"));
        assert_eq!(display.last_digits(), Some(DigitReadout::Blank));
        assert_eq!(display.events().len(), 2);
    }
}
