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
//! One-time Redfish boot overrides for a set of BMCs, followed by a fleet power cycle.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::{path::Path, sync::Arc};
//! use bootcycle::*;
//!
//! let config = FleetConfig::load(Path::new("bootcycle.toml"))?;
//! let pool = RedfishClientPool::builder().build()?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(RedfishOverrideAdapter::new(pool)),
//!     PowerCycleCoordinator::new(Arc::new(ScriptFleetPower::new(config.power_cycle))),
//!     RunPolicy::default(),
//! );
//! let report = orchestrator.run(&config.registry).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
pub mod boot_override;
mod error;
pub mod model;
mod network;
pub mod orchestrator;
pub mod power;
pub mod registry;

pub use boot_override::{OverrideApplier, RedfishOverrideAdapter};
pub use error::{ConfigurationError, OverrideError, PowerCycleError, RedfishError};
pub use model::{BootSourceOverrideEnabled, BootSourceOverrideMode, BootSourceOverrideTarget};
pub use network::{
    Endpoint, RedfishClientPool, RedfishClientPoolBuilder, RedfishHttpClient, Session,
    REDFISH_ENDPOINT,
};
pub use orchestrator::{exit_code, Orchestrator, RunPolicy, RunReport, RunState, TargetOutcome};
pub use power::{FleetPower, PowerCycleCoordinator, PowerCycleReport, ScriptFleetPower};
pub use registry::{BootOverrideDescriptor, FleetConfig, PowerCycleConfig, Target, TargetRegistry};
