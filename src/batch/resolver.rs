// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{BTreeMap, HashMap};

use crate::batch::{BatchConfig, RuntimeContext, script};
use crate::errors::{Error, Result};

/// Configuration with every `%NAME%` placeholder replaced by its final
/// string value. Tokens outside the resolver vocabulary (Slurm filename
/// patterns like `%j` or `%x`) are preserved verbatim for the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    values: BTreeMap<String, String>,
}

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { values }
    }
}

/// Expand every placeholder in `config`, independent of declaration order.
///
/// Resolution is on-demand and memoized: resolving a key first resolves the
/// keys it references, so forward references cost nothing extra and each key
/// is computed at most once. An in-progress stack turns self-reference into
/// `CyclicReference` instead of unbounded recursion.
pub fn resolve(config: &BatchConfig, context: &RuntimeContext) -> Result<ResolvedConfig> {
    let mut resolver = Resolver {
        config,
        context,
        memo: HashMap::new(),
        in_progress: Vec::new(),
    };
    let mut values = BTreeMap::new();
    for key in config.keys() {
        values.insert(key.to_string(), resolver.resolve_key(key)?);
    }
    Ok(ResolvedConfig { values })
}

struct Resolver<'a> {
    config: &'a BatchConfig,
    context: &'a RuntimeContext,
    memo: HashMap<String, String>,
    in_progress: Vec<String>,
}

impl Resolver<'_> {
    fn resolve_key(&mut self, key: &str) -> Result<String> {
        if let Some(done) = self.memo.get(key) {
            return Ok(done.clone());
        }
        if self.in_progress.iter().any(|k| k == key) {
            let mut chain = self.in_progress.join(" -> ");
            chain.push_str(" -> ");
            chain.push_str(key);
            return Err(Error::CyclicReference { chain });
        }

        // The key is guaranteed present; resolve_key is only entered for
        // config keys.
        let raw = self.config.get(key).unwrap_or_default().to_string();
        self.in_progress.push(key.to_string());
        let expanded = self.expand_value(key, &raw);
        self.in_progress.pop();
        let expanded = expanded?;
        self.memo.insert(key.to_string(), expanded.clone());
        Ok(expanded)
    }

    fn expand_value(&mut self, owner: &str, raw: &str) -> Result<String> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match token_length(after) {
                Some(len) => {
                    let token = &after[..len];
                    out.push_str(&self.substitute(owner, token)?);
                    rest = &after[len + 1..];
                }
                None => {
                    // Not in the vocabulary (scheduler-native patterns like
                    // %j, or a stray percent); keep it verbatim.
                    out.push('%');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn substitute(&mut self, owner: &str, token: &str) -> Result<String> {
        if let Some(value) = self.context.lookup(token) {
            return Ok(value.to_string());
        }
        if self.config.contains(token) {
            return self.resolve_key(token);
        }
        if let Some(default) = script::default_for(token) {
            return Ok(default.to_string());
        }
        Err(Error::UnresolvableReference {
            key: owner.to_string(),
            token: token.to_string(),
        })
    }
}

/// Length of a valid placeholder name at the start of `after`, where the
/// leading `%` has already been consumed and a closing `%` must follow.
/// Names match `[A-Z][A-Z0-9_]*`.
fn token_length(after: &str) -> Option<usize> {
    let end = after.find('%')?;
    let candidate = &after[..end];
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        Some(end)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::test_context;

    #[test]
    fn resolves_forward_references_regardless_of_declaration_order() {
        let config = BatchConfig::from_pairs(&[
            ("PATH_EXTRAS", "%PICSRC%/bin"),
            ("PICSRC", "/home/%USER%/picongpu"),
        ]);
        let resolved = resolve(&config, &test_context()).unwrap();
        assert_eq!(resolved.get("PICSRC"), Some("/home/alice/picongpu"));
        assert_eq!(resolved.get("PATH_EXTRAS"), Some("/home/alice/picongpu/bin"));
    }

    #[test]
    fn expands_repeated_and_multiple_tokens_in_one_value() {
        let config = BatchConfig::from_pairs(&[
            ("A", "x"),
            ("B", "%A%-%A%/%USER%"),
        ]);
        let resolved = resolve(&config, &test_context()).unwrap();
        assert_eq!(resolved.get("B"), Some("x-x/alice"));
    }

    #[test]
    fn direct_cycle_is_reported_not_overflowed() {
        let config = BatchConfig::from_pairs(&[("A", "%B%"), ("B", "%A%")]);
        let err = resolve(&config, &test_context()).unwrap_err();
        let Error::CyclicReference { chain } = err else {
            panic!("expected cycle, got {err:?}");
        };
        assert!(chain.contains(" -> "));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let config = BatchConfig::from_pairs(&[("A", "pre %A% post")]);
        let err = resolve(&config, &test_context()).unwrap_err();
        assert!(matches!(err, Error::CyclicReference { .. }));
    }

    #[test]
    fn unknown_token_without_default_fails() {
        let config = BatchConfig::from_pairs(&[("A", "%NO_SUCH_KEY%")]);
        let err = resolve(&config, &test_context()).unwrap_err();
        let Error::UnresolvableReference { key, token } = err else {
            panic!("expected unresolvable reference, got {err:?}");
        };
        assert_eq!(key, "A");
        assert_eq!(token, "NO_SUCH_KEY");
    }

    #[test]
    fn schema_default_fills_unregistered_directive() {
        // MAIL_TYPE is a recognized directive with a registered default.
        let config = BatchConfig::from_pairs(&[("A", "notify=%MAIL_TYPE%")]);
        let resolved = resolve(&config, &test_context()).unwrap();
        assert_eq!(resolved.get("A"), Some("notify=NONE"));
    }

    #[test]
    fn scheduler_native_tokens_pass_through_verbatim() {
        let config = BatchConfig::from_pairs(&[
            ("STDOUT", "%SIM_DIR%/slurm-%j.out"),
            ("STDERR", "logs/%x-%A_%a.err"),
        ]);
        let resolved = resolve(&config, &test_context()).unwrap();
        assert_eq!(
            resolved.get("STDOUT"),
            Some("lwfa_20260826_120000/slurm-%j.out")
        );
        assert_eq!(resolved.get("STDERR"), Some("logs/%x-%A_%a.err"));
    }

    #[test]
    fn stray_percent_signs_are_preserved() {
        let config = BatchConfig::from_pairs(&[("MEMORY", "90%"), ("NOTE", "100%% sure")]);
        let resolved = resolve(&config, &test_context()).unwrap();
        assert_eq!(resolved.get("MEMORY"), Some("90%"));
        assert_eq!(resolved.get("NOTE"), Some("100%% sure"));
    }

    #[test]
    fn resolving_resolved_values_is_idempotent() {
        let config = BatchConfig::from_pairs(&[
            ("PICSRC", "/home/%USER%/picongpu"),
            ("PATH_EXTRAS", "%PICSRC%/bin"),
        ]);
        let first = resolve(&config, &test_context()).unwrap();
        let again = BatchConfig::from_pairs(&[
            ("PICSRC", first.get("PICSRC").unwrap()),
            ("PATH_EXTRAS", first.get("PATH_EXTRAS").unwrap()),
        ]);
        let second = resolve(&again, &test_context()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn diamond_fanin_resolves_each_key_once() {
        // B and C both reference A; D references B and C. Must terminate and
        // agree on A's value everywhere.
        let config = BatchConfig::from_pairs(&[
            ("A", "/root"),
            ("B", "%A%/b"),
            ("C", "%A%/c"),
            ("D", "%B%:%C%"),
        ]);
        let resolved = resolve(&config, &test_context()).unwrap();
        assert_eq!(resolved.get("D"), Some("/root/b:/root/c"));
    }
}
