// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::util::naming;

pub mod resolver;
pub mod script;
pub mod store;
pub mod submit;

pub use resolver::{ResolvedConfig, resolve};
pub use script::compose;
pub use store::BatchConfig;
pub use submit::parse_submit_ack;

/// Values known only at submission time and never stored in the scheduler
/// configuration. Immutable for the duration of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub user: String,
    pub simulation: String,
    /// Generated job-scoped folder name under the workspace root.
    pub sim_dir: String,
    pub workspace_root: String,
}

impl RuntimeContext {
    /// Context for a fresh submission; generates the job-scoped simulation
    /// folder name from the simulation name and the current time.
    pub fn for_submission(
        user: impl Into<String>,
        simulation: impl Into<String>,
        workspace_root: impl Into<String>,
    ) -> Self {
        let simulation = simulation.into();
        let sim_dir = naming::simulation_dir_name(&simulation);
        Self {
            user: user.into(),
            simulation,
            sim_dir,
            workspace_root: workspace_root.into(),
        }
    }

    /// Placeholder vocabulary contributed by the runtime side.
    pub fn lookup(&self, token: &str) -> Option<&str> {
        match token {
            "USER" => Some(&self.user),
            "SIM_NAME" => Some(&self.simulation),
            "SIM_DIR" => Some(&self.sim_dir),
            "WORKSPACE" => Some(&self.workspace_root),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> RuntimeContext {
    RuntimeContext {
        user: "alice".to_string(),
        simulation: "lwfa".to_string(),
        sim_dir: "lwfa_20260826_120000".to_string(),
        workspace_root: "/scratch/alice/beamline".to_string(),
    }
}
