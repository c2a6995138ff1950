//! The two indicator outputs and the mode they were last put in

pub mod pins;

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use embedded_hal::digital::{Error as _, OutputPin};
use tracing::{debug, warn};

use crate::command::Command;

pub use pins::LogPin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Summary of the last applied command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Yellow,
    White,
}

impl Mode {
    pub fn as_char(self) -> char {
        match self {
            Mode::Yellow => 'y',
            Mode::White => 'w',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputState {
    pub white: Level,
    pub yellow: Level,
    /// `None` until the first command arrives
    pub mode: Option<Mode>,
}

impl OutputState {
    /// Both outputs low, as configured pins come up
    pub const RESET: Self = Self {
        white: Level::Low,
        yellow: Level::Low,
        mode: None,
    };

    /// Both outputs high once startup has finished
    pub const POWER_ON: Self = Self {
        white: Level::High,
        yellow: Level::High,
        mode: None,
    };

    /// Where a command leaves the outputs. Independent of the prior state.
    ///
    /// `On` and `Yellow` land on the same state; both bytes are accepted.
    pub fn after(command: Command) -> Self {
        let (white, yellow, mode) = match command {
            Command::On => (Level::Low, Level::High, Mode::Yellow),
            Command::Off => (Level::Low, Level::Low, Mode::Yellow),
            Command::Yellow => (Level::Low, Level::High, Mode::Yellow),
            Command::White => (Level::High, Level::Low, Mode::White),
        };
        Self {
            white,
            yellow,
            mode: Some(mode),
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "white={:?} yellow={:?} mode={}",
            self.white,
            self.yellow,
            self.mode.map_or('-', Mode::as_char)
        )
    }
}

/// Sole writer of the output pins.
///
/// Both pins are driven before the new [`OutputState`] is published, so a
/// reader holding an [`OutputsHandle`] never sees half a transition.
pub struct Outputs<W, Y> {
    white: W,
    yellow: Y,
    state: Arc<ArcSwap<OutputState>>,
}

/// Read side of [`Outputs`], cheap to clone
#[derive(Clone)]
pub struct OutputsHandle {
    state: Arc<ArcSwap<OutputState>>,
}

impl OutputsHandle {
    pub fn current(&self) -> OutputState {
        **self.state.load()
    }
}

impl<W: OutputPin, Y: OutputPin> Outputs<W, Y> {
    pub fn new(white: W, yellow: Y) -> Self {
        Self {
            white,
            yellow,
            state: Arc::new(ArcSwap::from_pointee(OutputState::RESET)),
        }
    }

    pub fn power_on(&mut self) {
        self.drive(OutputState::POWER_ON);
    }

    pub fn apply(&mut self, command: Command) -> OutputState {
        let target = OutputState::after(command);
        self.drive(target);
        debug!("Applied {:?}: {}", command, target);
        target
    }

    pub fn state(&self) -> OutputState {
        **self.state.load()
    }

    pub fn handle(&self) -> OutputsHandle {
        OutputsHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn drive(&mut self, target: OutputState) {
        if let Err(e) = set_level(&mut self.white, target.white) {
            warn!("Failed to drive white output: {:?}", e.kind());
        }
        if let Err(e) = set_level(&mut self.yellow, target.yellow) {
            warn!("Failed to drive yellow output: {:?}", e.kind());
        }
        self.state.store(Arc::new(target));
    }
}

fn set_level<P: OutputPin>(pin: &mut P, level: Level) -> Result<(), P::Error> {
    match level {
        Level::High => pin.set_high(),
        Level::Low => pin.set_low(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> (Outputs<LogPin, LogPin>, LogPin, LogPin) {
        let white = LogPin::new("white", 1);
        let yellow = LogPin::new("yellow", 3);
        let (w, y) = (white.clone(), yellow.clone());
        (Outputs::new(white, yellow), w, y)
    }

    #[test]
    fn command_table() {
        let cases = [
            (Command::On, Level::Low, Level::High, Mode::Yellow),
            (Command::Off, Level::Low, Level::Low, Mode::Yellow),
            (Command::Yellow, Level::Low, Level::High, Mode::Yellow),
            (Command::White, Level::High, Level::Low, Mode::White),
        ];

        let priors = [
            OutputState::RESET,
            OutputState::POWER_ON,
            OutputState::after(Command::White),
            OutputState::after(Command::Off),
        ];

        for (command, white, yellow, mode) in cases {
            for prior in priors {
                let (mut outputs, w, y) = outputs();
                outputs.drive(prior);

                let state = outputs.apply(command);
                assert_eq!(state.white, white, "{command:?} from {prior}");
                assert_eq!(state.yellow, yellow, "{command:?} from {prior}");
                assert_eq!(state.mode, Some(mode), "{command:?} from {prior}");
                assert_eq!(w.level(), white);
                assert_eq!(y.level(), yellow);
                assert_eq!(outputs.state(), state);
            }
        }
    }

    #[test]
    fn repeating_a_command_is_idempotent() {
        let (mut outputs, _, _) = outputs();
        let first = outputs.apply(Command::White);
        let second = outputs.apply(Command::White);
        assert_eq!(first, second);
    }

    #[test]
    fn handle_sees_published_state() {
        let (mut outputs, _, _) = outputs();
        let handle = outputs.handle();
        assert_eq!(handle.current(), OutputState::RESET);

        outputs.power_on();
        assert_eq!(handle.current(), OutputState::POWER_ON);

        outputs.apply(Command::Yellow);
        assert_eq!(handle.current().mode.map(Mode::as_char), Some('y'));
    }

    #[test]
    fn display_shows_mode_char() {
        let state = OutputState::after(Command::White);
        assert_eq!(state.to_string(), "white=High yellow=Low mode=w");
        assert_eq!(OutputState::RESET.to_string(), "white=Low yellow=Low mode=-");
    }
}
