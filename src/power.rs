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
use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{process::Command, time::Instant};
use tracing::{error, info, warn};

use crate::{registry::PowerCycleConfig, PowerCycleError};

/// The external operations that turn the fleet off and on.
#[async_trait::async_trait]
pub trait FleetPower: Send + Sync + 'static {
    /// Best effort. Forgets SSH host keys so reinstalled hosts don't trigger key mismatch
    /// prompts in the shutdown scripts.
    async fn clear_known_hosts(&self) -> Result<(), PowerCycleError>;

    /// Returns once the shutdown operation has reported completion.
    async fn shutdown_fleet(&self) -> Result<(), PowerCycleError>;

    async fn power_up_fleet(&self) -> Result<(), PowerCycleError>;
}

/// Runs the configured shutdown and power-up programs and checks their exit status.
pub struct ScriptFleetPower {
    config: PowerCycleConfig,
}

impl ScriptFleetPower {
    pub fn new(config: PowerCycleConfig) -> Self {
        Self { config }
    }
}

async fn run_command(argv: &[String]) -> Result<(), String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("empty command".to_string());
    };
    info!("Running {}", argv.join(" "));
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("could not start: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("exited with {status}"))
    }
}

#[async_trait::async_trait]
impl FleetPower for ScriptFleetPower {
    async fn clear_known_hosts(&self) -> Result<(), PowerCycleError> {
        let Some(path) = &self.config.known_hosts else {
            return Err(PowerCycleError::KnownHostsClearFailed {
                path: PathBuf::new(),
                reason: "no home directory".to_string(),
            });
        };
        // truncate in place
        tokio::fs::write(path, b"")
            .await
            .map_err(|e| PowerCycleError::KnownHostsClearFailed {
                path: path.clone(),
                reason: e.to_string(),
            })
    }

    async fn shutdown_fleet(&self) -> Result<(), PowerCycleError> {
        run_command(&self.config.shutdown)
            .await
            .map_err(|reason| PowerCycleError::ShutdownFailed {
                command: self.config.shutdown.join(" "),
                reason,
            })
    }

    async fn power_up_fleet(&self) -> Result<(), PowerCycleError> {
        run_command(&self.config.power_up)
            .await
            .map_err(|reason| PowerCycleError::PowerUpFailed {
                command: self.config.power_up.join(" "),
                reason,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerCycleStep {
    ClearKnownHosts,
    Shutdown,
    Settle,
    PowerUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum StepStatus {
    Succeeded,
    Skipped,
    Failed { error: PowerCycleError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: PowerCycleStep,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Every step of one power cycle, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PowerCycleReport {
    pub steps: Vec<StepOutcome>,
    /// The error that stopped the sequence, if any
    pub error: Option<PowerCycleError>,
}

impl PowerCycleReport {
    pub fn result(&self) -> Result<(), &PowerCycleError> {
        match &self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn status_of(&self, step: PowerCycleStep) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }

    fn record(&mut self, step: PowerCycleStep, status: StepStatus) {
        self.steps.push(StepOutcome { step, status });
    }

    fn abort(&mut self, step: PowerCycleStep, e: PowerCycleError, remaining: &[PowerCycleStep]) {
        error!("Power cycle aborted at {step:?}: {e}");
        self.record(step, StepStatus::Failed { error: e.clone() });
        for s in remaining {
            self.record(*s, StepStatus::Skipped);
        }
        self.error = Some(e);
    }
}

/// Shutdown, settle, power up. Power up never runs unless shutdown succeeded.
pub struct PowerCycleCoordinator {
    power: Arc<dyn FleetPower>,
}

impl PowerCycleCoordinator {
    pub fn new(power: Arc<dyn FleetPower>) -> Self {
        Self { power }
    }

    /// `deadline` bounds the settle delay: if it passes first, power-up is skipped.
    pub async fn cycle_fleet(
        &self,
        clear_known_hosts: bool,
        settle: Duration,
        deadline: Option<Instant>,
    ) -> PowerCycleReport {
        use PowerCycleStep::*;
        let mut report = PowerCycleReport::default();

        if clear_known_hosts {
            match self.power.clear_known_hosts().await {
                Ok(()) => report.record(ClearKnownHosts, StepStatus::Succeeded),
                Err(e) => {
                    warn!("{e}");
                    report.record(ClearKnownHosts, StepStatus::Failed { error: e });
                }
            }
        } else {
            report.record(ClearKnownHosts, StepStatus::Skipped);
        }

        if let Err(e) = self.power.shutdown_fleet().await {
            report.abort(Shutdown, e, &[Settle, PowerUp]);
            return report;
        }
        report.record(Shutdown, StepStatus::Succeeded);

        info!("Fleet is down, waiting {}s before power up", settle.as_secs());
        let start = Instant::now();
        match deadline {
            Some(d) if start.checked_add(settle).map_or(true, |end| d < end) => {
                tokio::time::sleep_until(d).await;
                let e = PowerCycleError::SettleInterrupted {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                };
                report.abort(Settle, e, &[PowerUp]);
                return report;
            }
            _ => tokio::time::sleep(settle).await,
        }
        report.record(Settle, StepStatus::Succeeded);

        if let Err(e) = self.power.power_up_fleet().await {
            report.abort(PowerUp, e, &[]);
            return report;
        }
        report.record(PowerUp, StepStatus::Succeeded);
        info!("Fleet power cycle complete");
        report
    }
}
