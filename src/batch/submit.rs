// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::errors::{Error, Result};

/// Extract the scheduler job id from an `sbatch` invocation's output.
///
/// Slurm acknowledges with a single line of the form
/// `Submitted batch job 123456`; the id is the last whitespace-separated
/// token after the prefix and is treated as opaque. Anything on stderr, or
/// stdout without the acknowledgment line, is a failed submission.
pub fn parse_submit_ack(stdout: &str, stderr: &str) -> Result<String> {
    if !stderr.trim().is_empty() {
        return Err(submission_error(stdout, stderr));
    }
    let id = stdout
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("Submitted batch job"))
        .and_then(|rest| rest.split_whitespace().last());
    match id {
        Some(id) => Ok(id.to_string()),
        None => Err(submission_error(stdout, stderr)),
    }
}

fn submission_error(stdout: &str, stderr: &str) -> Error {
    Error::SubmissionParse {
        stdout: stdout.trim().to_string(),
        stderr: stderr.trim().to_string(),
    }
}
