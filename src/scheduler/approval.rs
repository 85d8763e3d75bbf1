//! Safety checkpoints: external approval before dispatch.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::actions::Action;

/// Why an action is waiting for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Manual autonomy: every action needs approval.
    Manual,
    HighRisk,
    /// The plan's confidence is under the configured threshold.
    LowConfidence,
}

impl fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual approval"),
            Self::HighRisk => write!(f, "high-risk action"),
            Self::LowConfidence => write!(f, "low plan confidence"),
        }
    }
}

/// One pending approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub action: Action,
    pub reason: CheckpointReason,
    pub plan_confidence: f32,
}

/// Grants or denies checkpointed actions. The scheduler bounds every call
/// with the checkpoint timeout.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn approve(&self, request: &ApprovalRequest) -> bool;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn approve(&self, _request: &ApprovalRequest) -> bool {
        true
    }
}

/// Denies everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn approve(&self, _request: &ApprovalRequest) -> bool {
        false
    }
}

/// A request handed to a front end, answered through `respond`.
pub struct PendingApproval {
    pub request: ApprovalRequest,
    responder: oneshot::Sender<bool>,
}

impl PendingApproval {
    pub fn respond(self, approved: bool) {
        // The scheduler may have timed out already
        let _ = self.responder.send(approved);
    }
}

/// Forwards approval requests over a channel to whoever holds the receiver.
///
/// A dropped receiver or responder counts as a denial.
pub struct ChannelApprovalGate {
    sender: mpsc::Sender<PendingApproval>,
}

impl ChannelApprovalGate {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ApprovalGate for ChannelApprovalGate {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        let (responder, answer) = oneshot::channel();
        let pending = PendingApproval {
            request: request.clone(),
            responder,
        };
        if self.sender.send(pending).await.is_err() {
            tracing::warn!("No approval listener; denying {}", request.action.id);
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            action: Action::new("a1", "get_secret"),
            reason: CheckpointReason::HighRisk,
            plan_confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_channel_gate_round_trip() {
        let (gate, mut rx) = ChannelApprovalGate::new(4);
        let responder = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request.reason, CheckpointReason::HighRisk);
            pending.respond(true);
        });
        assert!(gate.approve(&request()).await);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_gate_denies_without_listener() {
        let (gate, rx) = ChannelApprovalGate::new(1);
        drop(rx);
        assert!(!gate.approve(&request()).await);
    }

    #[tokio::test]
    async fn test_fixed_gates() {
        assert!(AutoApprove.approve(&request()).await);
        assert!(!DenyAll.approve(&request()).await);
    }
}
