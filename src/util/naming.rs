// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use chrono::Local;

/// Build the per-job simulation folder name: the sanitized simulation name
/// plus a local timestamp, e.g. `lwfa_20260826_142233`.
pub fn simulation_dir_name(simulation: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}", sanitize_simulation_name(simulation), stamp)
}

/// Strip path traversal and whitespace from a user-supplied simulation name
/// before it becomes a remote directory component.
pub fn sanitize_simulation_name(name: &str) -> String {
    name.trim()
        .replace("..", "")
        .replace(['/', '\\'], "")
        .replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_traversal_and_spaces() {
        assert_eq!(sanitize_simulation_name(" laser wakefield "), "laser_wakefield");
        assert_eq!(sanitize_simulation_name("../../etc"), "etc");
        assert_eq!(sanitize_simulation_name("a/b\\c"), "abc");
    }

    #[test]
    fn simulation_dir_name_embeds_sanitized_name() {
        let name = simulation_dir_name("my run");
        assert!(name.starts_with("my_run_"));
        // name_YYYYmmdd_HHMMSS
        let stamp = &name["my_run_".len()..];
        assert_eq!(stamp.len(), 15);
    }
}
