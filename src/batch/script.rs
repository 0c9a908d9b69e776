// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::batch::{ResolvedConfig, RuntimeContext};
use crate::errors::{Error, Result};

/// One recognized scheduler directive. `flag` names the `#SBATCH` option
/// the directive maps to; schema-level directives (paths, modules, exec
/// command) carry no flag and feed the script body instead.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveSpec {
    pub key: &'static str,
    pub flag: Option<&'static str>,
    pub required: bool,
    pub default: Option<&'static str>,
}

/// The full directive schema, in emission order for the `#SBATCH` block.
pub const DIRECTIVES: &[DirectiveSpec] = &[
    DirectiveSpec { key: "JOB_NAME", flag: Some("--job-name"), required: false, default: None },
    DirectiveSpec { key: "NODES", flag: Some("--nodes"), required: false, default: None },
    DirectiveSpec { key: "TASKS_PER_NODE", flag: Some("--ntasks-per-node"), required: false, default: None },
    DirectiveSpec { key: "CPUS_PER_TASK", flag: Some("--cpus-per-task"), required: false, default: None },
    DirectiveSpec { key: "GRES", flag: Some("--gres"), required: false, default: None },
    DirectiveSpec { key: "WALLTIME", flag: Some("--time"), required: false, default: None },
    DirectiveSpec { key: "PARTITION", flag: Some("--partition"), required: false, default: None },
    DirectiveSpec { key: "MEMORY", flag: Some("--mem"), required: false, default: None },
    DirectiveSpec { key: "STDOUT", flag: Some("--output"), required: false, default: None },
    DirectiveSpec { key: "STDERR", flag: Some("--error"), required: false, default: None },
    DirectiveSpec { key: "MAIL_TYPE", flag: None, required: false, default: Some("NONE") },
    DirectiveSpec { key: "MAIL_USER", flag: None, required: false, default: None },
    DirectiveSpec { key: "SCRATCH", flag: None, required: true, default: None },
    DirectiveSpec { key: "PICSRC", flag: None, required: true, default: None },
    DirectiveSpec { key: "MODULES", flag: None, required: false, default: None },
    DirectiveSpec { key: "BACKEND", flag: None, required: false, default: Some("cuda") },
    DirectiveSpec { key: "TEMPLATE", flag: None, required: false, default: None },
    DirectiveSpec { key: "PATH_EXTRAS", flag: None, required: false, default: None },
    DirectiveSpec { key: "PYTHONPATH_EXTRAS", flag: None, required: false, default: None },
    DirectiveSpec { key: "EXEC_COMMAND", flag: None, required: false, default: None },
];

const DEFAULT_EXEC_TEMPLATE: &str = "srun %PICSRC%/bin/picongpu -d %SCRATCH%/%SIM_DIR%";

/// Registered default for a directive, consulted by the placeholder
/// resolver when a token names no config key and no runtime variable.
pub fn default_for(key: &str) -> Option<&'static str> {
    DIRECTIVES
        .iter()
        .find(|spec| spec.key == key)
        .and_then(|spec| spec.default)
}

/// Assemble the full submission script. Pure and deterministic: identical
/// resolved configuration and context produce byte-identical output.
pub fn compose(resolved: &ResolvedConfig, context: &RuntimeContext) -> Result<String> {
    for spec in DIRECTIVES.iter().filter(|spec| spec.required) {
        if present(resolved, spec.key).is_none() {
            return Err(Error::MissingRequiredDirective { name: spec.key });
        }
    }

    let mut script = String::from("#!/bin/bash\n");

    for spec in DIRECTIVES {
        let Some(flag) = spec.flag else { continue };
        if let Some(value) = present(resolved, spec.key) {
            script.push_str(&format!("#SBATCH {flag}={value}\n"));
        }
    }

    // Notification settings always emit, falling back to the submitting
    // user and to no mail.
    let mail_user = present(resolved, "MAIL_USER").unwrap_or(&context.user);
    let mail_type = present(resolved, "MAIL_TYPE").unwrap_or("NONE");
    script.push_str(&format!("#SBATCH --mail-user={mail_user}\n"));
    script.push_str(&format!("#SBATCH --mail-type={mail_type}\n"));

    script.push_str("\nmodule purge\n");
    if let Some(modules) = present(resolved, "MODULES") {
        for module in modules.split_whitespace() {
            script.push_str(&format!("module load {module}\n"));
        }
    }

    // Exports reuse the already-resolved values; nothing here re-derives a
    // path on its own.
    let backend = present(resolved, "BACKEND").unwrap_or("cuda");
    script.push_str(&format!("\nexport PIC_BACKEND={backend}\n"));
    if let Some(template) = present(resolved, "TEMPLATE") {
        script.push_str(&format!("export PIC_TEMPLATE={template}\n"));
    }
    if let Some(extras) = present(resolved, "PATH_EXTRAS") {
        script.push_str(&format!("export PATH=\"$PATH:{extras}\"\n"));
    }
    if let Some(extras) = present(resolved, "PYTHONPATH_EXTRAS") {
        script.push_str(&format!("export PYTHONPATH=\"$PYTHONPATH:{extras}\"\n"));
    }

    script.push('\n');
    script.push_str(&exec_command(resolved, context));
    script.push('\n');
    Ok(script)
}

/// The single execution-command line. An explicit `EXEC_COMMAND` directive
/// arrives fully resolved; the built-in template still carries runtime
/// tokens that are substituted here from the same resolved values.
fn exec_command(resolved: &ResolvedConfig, context: &RuntimeContext) -> String {
    if let Some(command) = present(resolved, "EXEC_COMMAND") {
        return command.to_string();
    }
    // Required directives were checked in compose.
    let scratch = present(resolved, "SCRATCH").unwrap_or_default();
    let picsrc = present(resolved, "PICSRC").unwrap_or_default();
    DEFAULT_EXEC_TEMPLATE
        .replace("%SCRATCH%", scratch)
        .replace("%PICSRC%", picsrc)
        .replace("%SIM_DIR%", &context.sim_dir)
}

/// A directive counts as present only with a non-empty value; an empty
/// value must never become an empty `#SBATCH` line.
fn present<'a>(resolved: &'a ResolvedConfig, key: &str) -> Option<&'a str> {
    resolved.get(key).filter(|value| !value.is_empty())
}
