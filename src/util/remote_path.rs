// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Join a remote POSIX base path with a further segment, normalizing the
/// result syntactically (no remote access). The remote host is a Linux
/// cluster, so this works on `/`-separated strings rather than `Path`.
pub fn join_remote(base: &str, segment: &str) -> String {
    let mut joined = String::from(base.trim_end_matches('/'));
    for part in segment.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if let Some(idx) = joined.rfind('/') {
                    joined.truncate(idx);
                }
            }
            part => {
                joined.push('/');
                joined.push_str(part);
            }
        }
    }
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Prefix chain for `mkdir -p`-style creation over SFTP: every ancestor of
/// `remote_dir`, shallowest first.
pub fn ancestor_chain(remote_dir: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut cur = String::new();
    for part in remote_dir.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        cur.push('/');
        cur.push_str(part);
        chain.push(cur.clone());
    }
    chain
}

/// Very small, safe-ish shell escaper for paths.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}
