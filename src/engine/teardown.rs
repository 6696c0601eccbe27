// src/engine/teardown.rs

//! Escalation bookkeeping for the job's children.

use crate::types::{ProcessRole, StopSignal, TerminationState};

/// Order in which long-lived children are stopped. The tunnel goes first:
/// it forwards to the server, so stopping the server first would make the
/// tunnel log spurious connection failures.
pub const TEARDOWN_ORDER: [ProcessRole; 2] = [ProcessRole::Connector, ProcessRole::Server];

/// Polite signal for each child.
pub fn graceful_signal(role: ProcessRole) -> StopSignal {
    match role {
        ProcessRole::Connector => StopSignal::Interrupt,
        _ => StopSignal::Terminate,
    }
}

/// Termination state of server, tunnel and the one short-lived child that
/// may be running alongside them. `None` means never spawned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children {
    server: Option<TerminationState>,
    connector: Option<TerminationState>,
    /// Install, tests or cloud tests; stages run one at a time, so a new
    /// short-lived child replaces the previous one.
    current: Option<(ProcessRole, TerminationState)>,
}

impl Children {
    pub fn state(&self, role: ProcessRole) -> Option<TerminationState> {
        match role {
            ProcessRole::Server => self.server,
            ProcessRole::Connector => self.connector,
            _ => self
                .current
                .filter(|(current, _)| *current == role)
                .map(|(_, state)| state),
        }
    }

    fn state_mut(&mut self, role: ProcessRole) -> Option<&mut TerminationState> {
        match role {
            ProcessRole::Server => self.server.as_mut(),
            ProcessRole::Connector => self.connector.as_mut(),
            _ => self
                .current
                .as_mut()
                .filter(|(current, _)| *current == role)
                .map(|(_, state)| state),
        }
    }

    /// Record that a child is now running. A long-lived child keeps its
    /// state across a repeated report.
    pub fn started(&mut self, role: ProcessRole) {
        match role {
            ProcessRole::Server => {
                self.server.get_or_insert(TerminationState::NotStarted);
            }
            ProcessRole::Connector => {
                self.connector.get_or_insert(TerminationState::NotStarted);
            }
            _ => self.current = Some((role, TerminationState::NotStarted)),
        }
    }

    /// Advance a child's state; ignored for children never started and for
    /// backward moves.
    pub fn advance(&mut self, role: ProcessRole, next: TerminationState) -> bool {
        match self.state_mut(role) {
            Some(state) => state.advance(next),
            None => false,
        }
    }

    /// Started children that have not confirmed exit. The short-lived child
    /// comes first since it talks to the tunnel and server, then the
    /// long-lived ones in teardown order.
    pub fn running(&self) -> Vec<ProcessRole> {
        let current = self.current.map(|(role, _)| role);
        current
            .into_iter()
            .chain(TEARDOWN_ORDER)
            .filter(|role| matches!(self.state(*role), Some(s) if !s.is_terminated()))
            .collect()
    }

    pub fn any_running(&self) -> bool {
        !self.running().is_empty()
    }
}
