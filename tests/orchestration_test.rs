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
//! Orchestration scenarios against a fake controller and fake fleet power operations.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use bootcycle::{
    model::SetBoot, power::PowerCycleStep, power::StepStatus, BootOverrideDescriptor,
    FleetPower, OverrideApplier, OverrideError, Orchestrator, PowerCycleCoordinator,
    PowerCycleError, RunPolicy, RunState, Target, TargetRegistry,
};
use tokio::time::Instant;

/// Keeps the last boot configuration written per target, like the BMC's pending boot settings.
#[derive(Default)]
struct FakeControllers {
    failures: HashMap<String, OverrideError>,
    boot: Mutex<HashMap<String, SetBoot>>,
    calls: Mutex<Vec<String>>,
}

impl FakeControllers {
    fn failing(ids: &[&str]) -> Self {
        let failures = ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    OverrideError::Unreachable {
                        url: format!("https://{id}-ilo/redfish/v1/SessionService/Sessions"),
                        reason: "connection refused".to_string(),
                    },
                )
            })
            .collect();
        Self {
            failures,
            ..Default::default()
        }
    }

    fn boot_state(&self) -> HashMap<String, SetBoot> {
        self.boot.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl OverrideApplier for FakeControllers {
    async fn apply_override(&self, target: &Target) -> Result<(), OverrideError> {
        self.calls.lock().unwrap().push(target.id.clone());
        if let Some(e) = self.failures.get(&target.id) {
            return Err(e.clone());
        }
        self.boot
            .lock()
            .unwrap()
            .insert(target.id.clone(), target.boot.to_patch());
        Ok(())
    }
}

#[derive(Default)]
struct FakeFleet {
    fail_shutdown: bool,
    fail_power_up: bool,
    events: Mutex<Vec<(&'static str, Instant)>>,
}

impl FakeFleet {
    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.0).collect()
    }

    fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| **e == name).count()
    }

    fn push(&self, name: &'static str) {
        self.events.lock().unwrap().push((name, Instant::now()));
    }
}

#[async_trait::async_trait]
impl FleetPower for FakeFleet {
    async fn clear_known_hosts(&self) -> Result<(), PowerCycleError> {
        self.push("clear_known_hosts");
        Ok(())
    }

    async fn shutdown_fleet(&self) -> Result<(), PowerCycleError> {
        self.push("shutdown");
        if self.fail_shutdown {
            return Err(PowerCycleError::ShutdownFailed {
                command: "shutdown_servers.sh".to_string(),
                reason: "exited with exit status: 1".to_string(),
            });
        }
        Ok(())
    }

    async fn power_up_fleet(&self) -> Result<(), PowerCycleError> {
        self.push("power_up");
        if self.fail_power_up {
            return Err(PowerCycleError::PowerUpFailed {
                command: "ilo_powerup_all.sh".to_string(),
                reason: "exited with exit status: 2".to_string(),
            });
        }
        Ok(())
    }
}

fn registry(n: usize) -> TargetRegistry {
    let targets = (0..n)
        .map(|i| {
            let id = format!("hpv{}", i + 2);
            Target::new(
                &id,
                &format!("https://{id}-ilo"),
                "Administrator",
                "secret",
                BootOverrideDescriptor::uefi_once(&format!(
                    "PciRoot(0x0)/Pci(0x1,0x0)/Pci(0x0,0x0)/MAC(6CB31188590{i},0x1)/IPv4(0.0.0.0)"
                )),
            )
        })
        .collect();
    TargetRegistry::new(targets).unwrap()
}

fn orchestrator(
    controllers: Arc<FakeControllers>,
    fleet: Arc<FakeFleet>,
    policy: RunPolicy,
) -> Orchestrator {
    Orchestrator::new(controllers, PowerCycleCoordinator::new(fleet), policy)
}

#[tokio::test(start_paused = true)]
async fn test_all_overrides_succeed() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet::default());
    let o = orchestrator(controllers.clone(), fleet.clone(), RunPolicy::default());

    let report = o.run(&registry(3)).await;

    assert_eq!(report.targets.len(), 3);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(fleet.events(), ["clear_known_hosts", "shutdown", "power_up"]);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        *controllers.calls.lock().unwrap(),
        ["hpv2", "hpv3", "hpv4"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_one_unreachable_still_power_cycles() {
    let controllers = Arc::new(FakeControllers::failing(&["hpv3"]));
    let fleet = Arc::new(FakeFleet::default());
    let o = orchestrator(controllers, fleet.clone(), RunPolicy::default());

    let report = o.run(&registry(3)).await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let failed = &report.targets[1];
    assert_eq!(failed.id, "hpv3");
    assert_eq!(failed.error.as_ref().map(|e| e.kind()), Some("Unreachable"));
    assert_eq!(fleet.count("power_up"), 1);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_fail_aborts() {
    let controllers = Arc::new(FakeControllers::failing(&["hpv2", "hpv3", "hpv4"]));
    let fleet = Arc::new(FakeFleet::default());
    let o = orchestrator(controllers, fleet.clone(), RunPolicy::default());

    let report = o.run(&registry(3)).await;

    assert_eq!(report.targets.len(), 3);
    assert!(fleet.events().is_empty());
    assert!(report.power_cycle.is_none());
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_fail_proceeds_when_allowed() {
    let controllers = Arc::new(FakeControllers::failing(&["hpv2", "hpv3", "hpv4"]));
    let fleet = Arc::new(FakeFleet::default());
    let policy = RunPolicy {
        skip_power_cycle_on_all_failures: false,
        ..Default::default()
    };
    let o = orchestrator(controllers, fleet.clone(), policy);

    let report = o.run(&registry(3)).await;

    assert_eq!(fleet.count("power_up"), 1);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_failure_never_powers_up() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet {
        fail_shutdown: true,
        ..Default::default()
    });
    let o = orchestrator(controllers, fleet.clone(), RunPolicy::default());

    let report = o.run(&registry(3)).await;

    assert_eq!(fleet.count("power_up"), 0);
    assert_eq!(report.state, RunState::CompletedWithPowerCycleFailure);
    assert_eq!(report.exit_code(), 3);
    let pc = report.power_cycle.as_ref().unwrap();
    assert_eq!(pc.status_of(PowerCycleStep::PowerUp), Some(&StepStatus::Skipped));
}

#[tokio::test(start_paused = true)]
async fn test_power_up_failure() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet {
        fail_power_up: true,
        ..Default::default()
    });
    let o = orchestrator(controllers, fleet.clone(), RunPolicy::default());

    let report = o.run(&registry(1)).await;

    assert!(matches!(
        report.power_cycle.as_ref().unwrap().result(),
        Err(PowerCycleError::PowerUpFailed { .. })
    ));
    assert_eq!(report.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_report_size_and_power_cycle_rule() {
    const N: usize = 4;
    let ids: Vec<String> = (0..N).map(|i| format!("hpv{}", i + 2)).collect();
    for k in 0..=N {
        let failing: Vec<&str> = ids[..k].iter().map(|s| s.as_str()).collect();
        let controllers = Arc::new(FakeControllers::failing(&failing));
        let fleet = Arc::new(FakeFleet::default());
        let o = orchestrator(controllers, fleet.clone(), RunPolicy::default());

        let report = o.run(&registry(N)).await;

        assert_eq!(report.targets.len(), N, "k={k}");
        assert_eq!(report.failed(), k, "k={k}");
        assert_eq!(fleet.count("shutdown") == 1, k < N, "k={k}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_respected() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet::default());
    let settle = Duration::from_secs(7);
    let policy = RunPolicy {
        settle,
        ..Default::default()
    };
    let o = orchestrator(controllers, fleet.clone(), policy);

    o.run(&registry(2)).await;

    let events = fleet.events.lock().unwrap().clone();
    let at = |name: &str| events.iter().find(|e| e.0 == name).unwrap().1;
    assert!(at("power_up") - at("shutdown") >= settle);
}

/// Each override takes longer than a BMC round trip should.
struct SlowControllers {
    delay: Duration,
}

#[async_trait::async_trait]
impl OverrideApplier for SlowControllers {
    async fn apply_override(&self, _target: &Target) -> Result<(), OverrideError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_during_overrides_leaves_fleet_untouched() {
    let fleet = Arc::new(FakeFleet::default());
    let policy = RunPolicy {
        timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    };
    let o = Orchestrator::new(
        Arc::new(SlowControllers {
            delay: Duration::from_secs(15),
        }),
        PowerCycleCoordinator::new(fleet.clone()),
        policy,
    );

    let report = o.run(&registry(1)).await;

    assert!(fleet.events().is_empty());
    assert!(report.power_cycle.is_none());
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_huge_timeout_is_no_timeout() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet::default());
    let policy = RunPolicy {
        timeout: Some(Duration::from_secs(u64::MAX)),
        settle: Duration::from_secs(1),
        ..Default::default()
    };
    let o = orchestrator(controllers, fleet.clone(), policy);

    let report = o.run(&registry(2)).await;

    assert_eq!(fleet.count("power_up"), 1);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_interrupts_settle() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet::default());
    let policy = RunPolicy {
        settle: Duration::from_secs(60),
        timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    };
    let o = orchestrator(controllers, fleet.clone(), policy);

    let report = o.run(&registry(2)).await;

    assert_eq!(fleet.count("power_up"), 0);
    assert!(matches!(
        report.power_cycle.as_ref().unwrap().result(),
        Err(PowerCycleError::SettleInterrupted { .. })
    ));
    assert_eq!(report.exit_code(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overrides_report_in_registry_order() {
    let controllers = Arc::new(FakeControllers::failing(&["hpv4"]));
    let fleet = Arc::new(FakeFleet::default());
    let policy = RunPolicy {
        concurrency: 3,
        settle: Duration::ZERO,
        ..Default::default()
    };
    let o = orchestrator(controllers, fleet.clone(), policy);

    let report = o.run(&registry(5)).await;

    let ids: Vec<_> = report.targets.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["hpv2", "hpv3", "hpv4", "hpv5", "hpv6"]);
    assert!(report.targets[2].error.is_some());
    assert_eq!(report.succeeded(), 4);
    assert_eq!(fleet.count("power_up"), 1);
}

// Overrides converge; power cycling happens once per run, so running twice cycles twice.
#[tokio::test(start_paused = true)]
async fn test_rerun_idempotent_overrides_not_power() {
    let controllers = Arc::new(FakeControllers::default());
    let fleet = Arc::new(FakeFleet::default());
    let o = orchestrator(controllers.clone(), fleet.clone(), RunPolicy::default());
    let reg = registry(3);

    o.run(&reg).await;
    let after_first = controllers.boot_state();
    o.run(&reg).await;
    let after_second = controllers.boot_state();

    assert_eq!(after_first, after_second);
    assert_eq!(after_first.len(), 3);
    assert_eq!(fleet.count("shutdown"), 2);
    assert_eq!(fleet.count("power_up"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes() {
    let controllers = Arc::new(FakeControllers::failing(&["hpv2"]));
    let fleet = Arc::new(FakeFleet::default());
    let o = orchestrator(controllers, fleet, RunPolicy::default());

    let report = o.run(&registry(2)).await;
    let v = serde_json::to_value(&report).unwrap();

    assert_eq!(v["state"], "Completed");
    assert_eq!(v["targets"][0]["error"]["kind"], "Unreachable");
    assert!(v["targets"][1]["error"].is_null());
    assert_eq!(v["power_cycle"]["steps"][1]["step"], "Shutdown");
    assert_eq!(v["power_cycle"]["steps"][1]["status"], "Succeeded");
}
