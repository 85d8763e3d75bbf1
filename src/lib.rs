// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Device Pilot
//!
//! Autonomous mission loop for Android devices.
//!
//! Every step captures the screen, lets prioritized rule-based skills
//! override the plan, falls back to a reasoning backend otherwise, runs the
//! resulting actions respecting their dependencies and safety checkpoints,
//! and reflects the outcome into a bounded similarity memory that also
//! watches for loops.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use device_pilot::{
//!     AdbTransport, ConfigOverrides, EventBus, ModelClient, ModelConfig, Orchestrator,
//!     PilotConfig, TracingSubscriber,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PilotConfig::from_env()?;
//!     let events = Arc::new(EventBus::default());
//!     events.subscribe(Arc::new(TracingSubscriber));
//!
//!     let transport = Arc::new(AdbTransport::new(None).with_timeout(config.device_timeout));
//!     let backend = Arc::new(ModelClient::new(ModelConfig::from_env()));
//!     let orchestrator = Orchestrator::new(config, transport, backend, events)?;
//!
//!     let mission = orchestrator.run("open whatsapp", ConfigOverrides::default()).await?;
//!     println!("{}: {}", mission.status, mission.summary.unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod memory;
pub mod mission;
pub mod model;
pub mod planner;
pub mod reflection;
pub mod scheduler;
pub mod skills;

pub use actions::{Action, ActionId, ActionPlan, PlanSource, PlanSummary, RiskLevel};
pub use config::{AutonomyLevel, ConfigOverrides, EvictionPolicy, PilotConfig};
pub use device::{AdbConnection, AdbError, AdbTransport, DeviceTransport, Observation, TransportResponse, UiElement};
pub use error::{PilotError, Result};
pub use events::{Event, EventBus, EventSubscriber, EventType, SubscriptionId, TracingSubscriber};
pub use memory::{Fingerprint, Fingerprinter, HashFingerprinter, MemoryRecord, MemoryStore, Outcome};
pub use mission::{
    AbortHandle, AnyOf, DeclaredComplete, ForegroundPackage, Mission, MissionStatus, MissionStore,
    Orchestrator, StepHistory, StepRecord, TerminationContext, TerminationPredicate,
};
pub use model::{ModelClient, ModelConfig, ModelError, ReasoningBackend};
pub use planner::ReasoningPlanner;
pub use reflection::{LoopGuard, LoopSignal, Reflection, Reflector};
pub use scheduler::{
    ActionReport, ActionScheduler, ActionStatus, ApprovalGate, ApprovalRequest, AutoApprove,
    ChannelApprovalGate, CheckpointReason, DenyAll, ExecutionReport,
};
pub use skills::{AdvisoryHint, Resolution, Skill, SkillPriority, SkillRegistry, SkillResult};
