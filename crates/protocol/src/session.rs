//! Charging session records and their state machine.
//!
//! ```text
//! Requested -> Verified -> Active -> Ended
//!          \           \        \-> ExpiredEnded
//!           \-----------\-> Rejected
//! ```
//!
//! Only `Active` sessions are kept in the orchestrator's session map.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use voltmesh_core::Timestamp;
use voltmesh_ledger::AuthenticationMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    Verified,
    Active,
    Rejected,
    Ended,
    ExpiredEnded,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Requested, Verified)
                | (Requested, Rejected)
                | (Verified, Active)
                | (Verified, Rejected)
                | (Active, Ended)
                | (Active, ExpiredEnded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Rejected | SessionState::Ended | SessionState::ExpiredEnded
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub ev_id: String,
    pub cs_id: String,
    /// Edge node that adjudicated a cross-domain session
    pub en_id: Option<String>,
    pub created_at: Timestamp,
    pub kind: AuthenticationMode,
    pub state: SessionState,
    pub ended_at: Option<Timestamp>,
    /// Power drawn once charging starts
    pub power_kw: Option<f64>,
}

impl Session {
    pub(crate) fn new(
        ev_id: &str,
        cs_id: &str,
        en_id: Option<&str>,
        kind: AuthenticationMode,
        now: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ev_id: ev_id.to_string(),
            cs_id: cs_id.to_string(),
            en_id: en_id.map(str::to_string),
            created_at: now,
            kind,
            state: SessionState::Requested,
            ended_at: None,
            power_kw: None,
        }
    }

    pub(crate) fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Move to a terminal ended state and stamp the end time.
    pub(crate) fn finish(&mut self, next: SessionState, now: Timestamp) -> Result<()> {
        self.transition(next)?;
        self.ended_at = Some(now);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_cross_domain(&self) -> bool {
        self.kind == AuthenticationMode::CrossDomain
    }

    pub fn duration_ms(&self, now: Timestamp) -> u64 {
        self.ended_at.unwrap_or(now).saturating_sub(self.created_at)
    }

    /// Strictly older than `ttl_ms` at `now`.
    pub fn is_expired_at(&self, now: Timestamp, ttl_ms: u64) -> bool {
        now.saturating_sub(self.created_at) > ttl_ms
    }
}
