//! Dispatch barrier: per-frame completion gate for in-flight sends.
//!
//! Phases per frame:
//!   Idle → Accumulating (first send registered)
//!        → Draining     (scan sealed, sends still outstanding)
//!        → Drained      (outstanding == 0)
//!        → Idle         (reset for the next frame)
//!
//! The frame buffer may only go back to its provider once the barrier is
//! Drained. Waiting is a `watch` subscription, not a poll loop.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPhase {
    Idle,
    Accumulating,
    Draining,
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarrierState {
    pub phase: BarrierPhase,
    pub outstanding: u32,
    /// Highest `outstanding` seen since the last reset.
    pub peak: u32,
    /// Permits handed out since the last reset.
    pub registered: u32,
}

impl BarrierState {
    const IDLE: BarrierState = BarrierState {
        phase: BarrierPhase::Idle,
        outstanding: 0,
        peak: 0,
        registered: 0,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    #[error("cannot register a send while the barrier is {0:?}")]
    Sealed(BarrierPhase),
    #[error("cannot reset with {outstanding} sends outstanding")]
    NotDrained { outstanding: u32 },
    #[error("barrier state channel closed")]
    Closed,
}

/// Cloneable handle to one barrier.
#[derive(Debug, Clone)]
pub struct DispatchBarrier {
    state: Arc<watch::Sender<BarrierState>>,
}

impl Default for DispatchBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchBarrier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BarrierState::IDLE);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> BarrierState {
        *self.state.borrow()
    }

    pub fn phase(&self) -> BarrierPhase {
        self.snapshot().phase
    }

    pub fn outstanding(&self) -> u32 {
        self.snapshot().outstanding
    }

    /// Watch every state change.
    pub fn subscribe(&self) -> watch::Receiver<BarrierState> {
        self.state.subscribe()
    }

    /// Count one more in-flight send. The returned permit decrements the
    /// count when dropped, on every exit path of the send.
    pub fn register(&self) -> Result<DispatchPermit, BarrierError> {
        let mut result = Ok(());
        self.state.send_modify(|s| match s.phase {
            BarrierPhase::Idle | BarrierPhase::Accumulating => {
                s.phase = BarrierPhase::Accumulating;
                s.outstanding += 1;
                s.registered += 1;
                s.peak = s.peak.max(s.outstanding);
            }
            phase => result = Err(BarrierError::Sealed(phase)),
        });
        result.map(|()| DispatchPermit {
            state: self.state.clone(),
        })
    }

    /// Mark the scan phase complete. No further sends can be registered
    /// until `reset`.
    pub fn seal(&self) {
        self.state.send_modify(|s| {
            if matches!(s.phase, BarrierPhase::Idle | BarrierPhase::Accumulating) {
                s.phase = if s.outstanding == 0 {
                    BarrierPhase::Drained
                } else {
                    BarrierPhase::Draining
                };
            }
        });
    }

    /// Wait until the barrier is Drained. Only resolves after `seal`.
    pub async fn drained(&self) -> Result<BarrierState, BarrierError> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| s.phase == BarrierPhase::Drained)
            .await
            .map_err(|_| BarrierError::Closed)?;
        Ok(*state)
    }

    /// Return to Idle for the next frame.
    pub fn reset(&self) -> Result<(), BarrierError> {
        let mut result = Ok(());
        self.state.send_modify(|s| match s.phase {
            BarrierPhase::Idle | BarrierPhase::Drained => *s = BarrierState::IDLE,
            _ => {
                result = Err(BarrierError::NotDrained {
                    outstanding: s.outstanding,
                })
            }
        });
        result
    }
}

/// Proof that one send is in flight. Dropping it completes the send.
#[derive(Debug)]
pub struct DispatchPermit {
    state: Arc<watch::Sender<BarrierState>>,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            debug_assert!(s.outstanding > 0, "permit dropped with nothing outstanding");
            s.outstanding = s.outstanding.saturating_sub(1);
            if s.outstanding == 0 && s.phase == BarrierPhase::Draining {
                s.phase = BarrierPhase::Drained;
            }
        });
    }
}
