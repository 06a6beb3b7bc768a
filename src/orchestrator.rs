/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::Semaphore, time::Instant};
use tracing::{error, info};

use crate::{
    boot_override::OverrideApplier,
    power::{PowerCycleCoordinator, PowerCycleReport, StepStatus},
    registry::{Target, TargetRegistry},
    OverrideError,
};

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(20);

/// Process exit codes of a run
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const PARTIAL_OVERRIDE_FAILURE: i32 = 1;
    pub const ABORTED: i32 = 2;
    pub const POWER_CYCLE_FAILED: i32 = 3;
}

#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub settle: Duration,
    /// Don't power-cycle when no override could be applied
    pub skip_power_cycle_on_all_failures: bool,
    pub clear_known_hosts: bool,
    /// Max overrides in flight. 1 applies them one after another in registry order.
    pub concurrency: usize,
    /// Overall run timeout. Interrupts the settle delay.
    pub timeout: Option<Duration>,
}

impl Default for RunPolicy {
    fn default() -> Self {
        RunPolicy {
            settle: DEFAULT_SETTLE,
            skip_power_cycle_on_all_failures: true,
            clear_known_hosts: true,
            concurrency: 1,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    ApplyingOverrides,
    AllFailed,
    AtLeastOneSucceeded,
    PowerCycling,
    Aborted,
    Completed,
    CompletedWithPowerCycleFailure,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Aborted | RunState::Completed | RunState::CompletedWithPowerCycleFailure
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub id: String,
    pub base_url: String,
    pub error: Option<OverrideError>,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per target, in registry order
    pub targets: Vec<TargetOutcome>,
    /// None if the power cycle never started
    pub power_cycle: Option<PowerCycleReport>,
    pub state: RunState,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.targets.iter().filter(|t| t.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.targets.len() - self.succeeded()
    }

    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Completed if self.failed() == 0 => exit_code::SUCCESS,
            RunState::Completed => exit_code::PARTIAL_OVERRIDE_FAILURE,
            RunState::CompletedWithPowerCycleFailure => exit_code::POWER_CYCLE_FAILED,
            _ => exit_code::ABORTED,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Boot overrides: {}/{} applied",
            self.succeeded(),
            self.targets.len()
        )?;
        for t in &self.targets {
            match &t.error {
                None => writeln!(f, "  {:<12} {:<32} OK", t.id, t.base_url)?,
                Some(e) => writeln!(
                    f,
                    "  {:<12} {:<32} FAILED {}: {e}",
                    t.id,
                    t.base_url,
                    e.kind()
                )?,
            }
        }
        match &self.power_cycle {
            None => writeln!(f, "Power cycle: not started")?,
            Some(pc) => {
                writeln!(f, "Power cycle:")?;
                for s in &pc.steps {
                    match &s.status {
                        StepStatus::Failed { error } => {
                            writeln!(f, "  {:<16} FAILED: {error}", format!("{:?}", s.step))?
                        }
                        other => writeln!(f, "  {:<16} {other:?}", format!("{:?}", s.step))?,
                    }
                }
            }
        }
        write!(f, "Result: {} (exit {})", self.state, self.exit_code())
    }
}

/// Applies every target's boot override, then power-cycles the fleet once.
pub struct Orchestrator {
    applier: Arc<dyn OverrideApplier>,
    coordinator: PowerCycleCoordinator,
    policy: RunPolicy,
}

impl Orchestrator {
    pub fn new(
        applier: Arc<dyn OverrideApplier>,
        coordinator: PowerCycleCoordinator,
        policy: RunPolicy,
    ) -> Self {
        Self {
            applier,
            coordinator,
            policy,
        }
    }

    pub async fn run(&self, registry: &TargetRegistry) -> RunReport {
        let started_at = Utc::now();
        // A timeout too large to represent is no timeout
        let deadline = self
            .policy
            .timeout
            .and_then(|t| Instant::now().checked_add(t));
        let mut state = RunState::Idle;

        transition(&mut state, RunState::ApplyingOverrides);
        let targets = self.apply_all(registry.list_targets()).await;
        let succeeded = targets.iter().filter(|t| t.is_success()).count();
        for t in targets.iter().filter(|t| !t.is_success()) {
            if let Some(e) = &t.error {
                error!("{}: boot override failed: {e}", t.id);
            }
        }

        let aborted = |mut state: RunState, targets: Vec<TargetOutcome>| {
            transition(&mut state, RunState::Aborted);
            RunReport {
                started_at,
                finished_at: Utc::now(),
                targets,
                power_cycle: None,
                state,
            }
        };

        if succeeded == 0 {
            transition(&mut state, RunState::AllFailed);
            if self.policy.skip_power_cycle_on_all_failures {
                return aborted(state, targets);
            }
        } else {
            transition(&mut state, RunState::AtLeastOneSucceeded);
        }

        // Never shut the fleet down without time left to power it back up
        if deadline.is_some_and(|d| Instant::now() >= d) {
            error!("Run timeout reached before power cycle, fleet left untouched");
            return aborted(state, targets);
        }

        transition(&mut state, RunState::PowerCycling);
        let power_cycle = self
            .coordinator
            .cycle_fleet(self.policy.clear_known_hosts, self.policy.settle, deadline)
            .await;
        let end = if power_cycle.result().is_ok() {
            RunState::Completed
        } else {
            RunState::CompletedWithPowerCycleFailure
        };
        transition(&mut state, end);

        RunReport {
            started_at,
            finished_at: Utc::now(),
            targets,
            power_cycle: Some(power_cycle),
            state,
        }
    }

    async fn apply_all(&self, targets: &[Target]) -> Vec<TargetOutcome> {
        let outcome = |t: &Target, result: Result<(), OverrideError>| TargetOutcome {
            id: t.id.clone(),
            base_url: t.base_url.clone(),
            error: result.err(),
        };

        if self.policy.concurrency <= 1 {
            let mut out = Vec::with_capacity(targets.len());
            for t in targets {
                let result = self.applier.apply_override(t).await;
                out.push(outcome(t, result));
            }
            return out;
        }

        let permits = Arc::new(Semaphore::new(self.policy.concurrency));
        let handles: Vec<_> = targets
            .iter()
            .map(|t| {
                let applier = self.applier.clone();
                let permits = permits.clone();
                let t = t.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    applier.apply_override(&t).await
                })
            })
            .collect();

        // Awaited in registry order, which is also the report order
        let mut out = Vec::with_capacity(targets.len());
        for (t, h) in targets.iter().zip(handles) {
            let result = match h.await {
                Ok(r) => r,
                Err(e) => Err(OverrideError::TaskFailed {
                    reason: e.to_string(),
                }),
            };
            out.push(outcome(t, result));
        }
        out
    }
}

fn transition(state: &mut RunState, next: RunState) {
    info!("Run state {state} -> {next}");
    *state = next;
}
