//! Remote commands: broker session, message queue and decoding

pub mod channel;
pub mod mqtt;

use std::time::{Duration, Instant};

use bytes::Bytes;
use embedded_hal::digital::OutputPin;
use flume::Receiver;
use tracing::{debug, info, trace, warn};

use crate::output::Outputs;

pub use channel::{Broker, CommandChannel, RECONNECT_DELAY};
pub use mqtt::{BrokerError, MqttBroker};

/// Longest a single message may occupy the dispatcher
pub const HANDLER_BUDGET: Duration = Duration::from_millis(50);

/// One inbound publish, as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

/// Single-byte remote commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `+`
    On,
    /// `-`
    Off,
    /// `y`
    Yellow,
    /// `w`
    White,
}

impl Command {
    /// Only the first payload byte counts. Anything unrecognised is `None`.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match payload.first()? {
            b'+' => Some(Command::On),
            b'-' => Some(Command::Off),
            b'y' => Some(Command::Yellow),
            b'w' => Some(Command::White),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::On => b'+',
            Command::Off => b'-',
            Command::Yellow => b'y',
            Command::White => b'w',
        }
    }
}

/// Apply one message to the outputs. Unknown commands change nothing.
pub fn handle_message<W: OutputPin, Y: OutputPin>(outputs: &mut Outputs<W, Y>, message: &Message) {
    let started = Instant::now();

    match Command::decode(&message.payload) {
        Some(command) => {
            let state = outputs.apply(command);
            metrics::counter!("bedcam_commands_applied").increment(1);
            info!("{} on {}: {}", command.as_byte() as char, message.topic, state);
        }
        None => trace!("Ignoring message on {} ({} bytes)", message.topic, message.payload.len()),
    }

    let elapsed = started.elapsed();
    if elapsed > HANDLER_BUDGET {
        warn!("Command handler took {:?}, budget is {:?}", elapsed, HANDLER_BUDGET);
    }
}

/// Drain the command queue until every sender is gone
pub async fn dispatch<W: OutputPin, Y: OutputPin>(rx: Receiver<Message>, mut outputs: Outputs<W, Y>) {
    while let Ok(message) = rx.recv_async().await {
        handle_message(&mut outputs, &message);
    }
    debug!("Command queue closed, dispatcher exiting");
}
