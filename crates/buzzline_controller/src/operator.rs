//! Operator input.
//!
//! Buttons on the operator panel (or any other thread) push commands through
//! an [`OperatorHandle`]; the controller drains them at the start of each
//! tick, so a command never preempts a tick in progress.

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Operator command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Start a match from `Idle`.
    Start,
    /// Abandon the running match.
    Abort,
    /// Dismiss the final score.
    Acknowledge,
    /// Press on behalf of the armed peripheral.
    SimulatedPress,
}

/// Cloneable sender for [`OperatorCommand`]s.
#[derive(Clone, Debug)]
pub struct OperatorHandle {
    tx: Sender<OperatorCommand>,
}

impl OperatorHandle {
    /// Requests a match start.
    pub fn start(&self) -> bool {
        self.send(OperatorCommand::Start)
    }

    /// Requests an abort.
    pub fn abort(&self) -> bool {
        self.send(OperatorCommand::Abort)
    }

    /// Acknowledges the finished match.
    pub fn acknowledge(&self) -> bool {
        self.send(OperatorCommand::Acknowledge)
    }

    /// Simulates a press by the armed peripheral.
    pub fn simulated_press(&self) -> bool {
        self.send(OperatorCommand::SimulatedPress)
    }

    /// Queues a command. Returns false if the queue is full or the
    /// controller is gone.
    pub fn send(&self, command: OperatorCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(?command, "operator queue full, command dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Creates the operator command queue.
#[must_use]
pub fn operator_channel(capacity: usize) -> (OperatorHandle, Receiver<OperatorCommand>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (OperatorHandle { tx }, rx)
}
