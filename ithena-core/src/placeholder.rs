//! Typed placeholder substitution for wrapper environment maps.
//!
//! Profile environment values may embed `{{ type : value }}` tokens that are
//! expanded before the child process is spawned:
//!
//! - `{{env:NAME}}` — the named variable from the parent environment
//! - `{{keyring:SERVICE:ACCOUNT}}` — a secret from the OS secret store
//! - `{{file:/path}}` — file contents with surrounding whitespace trimmed
//!
//! Whitespace around the type, colon, and value is ignored. Resolution never
//! panics and never aborts early: the whole map is processed so callers get a
//! complete picture, but only the *first* error is reported and, within a
//! single value, the first failing placeholder stops further substitution in
//! that value.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Matches `{{ type : value }}` with optional interior whitespace. The type
/// is validated in code so unknown types surface as errors rather than
/// passing through silently.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z]+)\s*:\s*([^}]+?)\s*\}\}").expect("placeholder regex is valid")
});

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A single placeholder that failed to resolve.
#[derive(Debug, thiserror::Error)]
pub enum PlaceholderError {
    #[error("environment variable '{name}' not found")]
    EnvMissing { name: String },

    #[error("invalid keyring reference '{value}', expected 'service:account'")]
    KeyringFormat { value: String },

    #[error("keyring error for '{service}:{account}': {source}")]
    Keyring {
        service: String,
        account: String,
        source: keyring::Error,
    },

    #[error("failed to read file '{path}': {source}")]
    File {
        path: String,
        source: std::io::Error,
    },

    #[error("unknown placeholder type '{kind}'")]
    UnknownType { kind: String },
}

/// The first resolution failure across a whole environment map, with the
/// offending key attached for context.
#[derive(Debug, thiserror::Error)]
#[error("failed to resolve placeholder for key '{key}': {source}")]
pub struct ResolveError {
    pub key: String,
    #[source]
    pub source: PlaceholderError,
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Result of resolving an environment map.
///
/// The map always contains an entry per input key (partially-resolved values
/// are kept intact), so callers can log the failure and abort, or proceed
/// with what resolved.
#[derive(Debug)]
pub struct ResolvedEnv {
    pub env: HashMap<String, String>,
    pub first_error: Option<ResolveError>,
}

/// Resolve every value in `env_map`, reporting the first error encountered.
pub fn resolve_placeholders(env_map: &HashMap<String, String>) -> ResolvedEnv {
    let mut resolved = HashMap::with_capacity(env_map.len());
    let mut first_error: Option<ResolveError> = None;

    for (key, value) in env_map {
        let (resolved_value, err) = resolve_value(value);
        if let Some(source) = err {
            if first_error.is_none() {
                first_error = Some(ResolveError {
                    key: key.clone(),
                    source,
                });
            }
        }
        resolved.insert(key.clone(), resolved_value);
    }

    ResolvedEnv {
        env: resolved,
        first_error,
    }
}

/// Resolve the placeholders in a single value.
///
/// On the first failure the remaining placeholders in this value are left
/// verbatim. A value without placeholders is returned unchanged.
fn resolve_value(value: &str) -> (String, Option<PlaceholderError>) {
    let mut first_error: Option<PlaceholderError> = None;

    let resolved = PLACEHOLDER_RE.replace_all(value, |caps: &regex::Captures| -> String {
        if first_error.is_some() {
            return caps[0].to_string();
        }
        match resolve_one(&caps[1], caps[2].trim()) {
            Ok(expansion) => expansion,
            Err(e) => {
                first_error = Some(e);
                caps[0].to_string()
            }
        }
    });

    (resolved.into_owned(), first_error)
}

/// Expand one `type:value` pair.
fn resolve_one(kind: &str, value: &str) -> Result<String, PlaceholderError> {
    match kind {
        "env" => std::env::var(value).map_err(|_| PlaceholderError::EnvMissing {
            name: value.to_string(),
        }),
        "keyring" => {
            let (service, account) =
                value
                    .split_once(':')
                    .ok_or_else(|| PlaceholderError::KeyringFormat {
                        value: value.to_string(),
                    })?;
            let service = service.trim();
            let account = account.trim();
            let lookup = || -> Result<String, keyring::Error> {
                keyring::Entry::new(service, account)?.get_password()
            };
            lookup().map_err(|source| PlaceholderError::Keyring {
                service: service.to_string(),
                account: account.to_string(),
                source,
            })
        }
        "file" => std::fs::read_to_string(value)
            .map(|contents| contents.trim().to_string())
            .map_err(|source| PlaceholderError::File {
                path: value.to_string(),
                source,
            }),
        other => Err(PlaceholderError::UnknownType {
            kind: other.to_string(),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn plain_values_pass_through_unchanged() {
        let resolved = resolve_placeholders(&map(&[("A", "plain"), ("B", "{not a placeholder}")]));
        assert!(resolved.first_error.is_none());
        assert_eq!(resolved.env["A"], "plain");
        assert_eq!(resolved.env["B"], "{not a placeholder}");
    }

    #[test]
    fn env_and_file_placeholders_resolve() {
        std::env::set_var("ITHENA_TEST_TOK", "abc");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hello").unwrap();

        let input = map(&[
            ("A", "{{env:ITHENA_TEST_TOK}}"),
            ("B", &format!("{{{{file:{}}}}}", file.path().display())),
            ("C", "plain"),
        ]);
        let resolved = resolve_placeholders(&input);
        assert!(resolved.first_error.is_none(), "{:?}", resolved.first_error);
        assert_eq!(resolved.env["A"], "abc");
        assert_eq!(resolved.env["B"], "hello");
        assert_eq!(resolved.env["C"], "plain");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        std::env::set_var("ITHENA_TEST_WS", "v");
        let resolved = resolve_placeholders(&map(&[("A", "{{ env : ITHENA_TEST_WS }}")]));
        assert!(resolved.first_error.is_none());
        assert_eq!(resolved.env["A"], "v");
    }

    #[test]
    fn embedded_placeholder_keeps_surrounding_text() {
        std::env::set_var("ITHENA_TEST_MID", "X");
        let resolved = resolve_placeholders(&map(&[("A", "pre-{{env:ITHENA_TEST_MID}}-post")]));
        assert_eq!(resolved.env["A"], "pre-X-post");
    }

    #[test]
    fn missing_env_var_reports_error_and_keeps_token() {
        let resolved =
            resolve_placeholders(&map(&[("A", "{{env:ITHENA_TEST_DEFINITELY_UNSET_42}}")]));
        let err = resolved.first_error.expect("expected an error");
        assert_eq!(err.key, "A");
        assert!(matches!(err.source, PlaceholderError::EnvMissing { .. }));
        // Partially-resolved entry is kept intact.
        assert_eq!(resolved.env["A"], "{{env:ITHENA_TEST_DEFINITELY_UNSET_42}}");
    }

    #[test]
    fn first_failure_stops_substitution_within_a_value() {
        std::env::set_var("ITHENA_TEST_SECOND", "second");
        let resolved = resolve_placeholders(&map(&[(
            "A",
            "{{env:ITHENA_TEST_UNSET_FIRST}} {{env:ITHENA_TEST_SECOND}}",
        )]));
        assert!(resolved.first_error.is_some());
        // The second placeholder is left verbatim once the first failed.
        assert_eq!(
            resolved.env["A"],
            "{{env:ITHENA_TEST_UNSET_FIRST}} {{env:ITHENA_TEST_SECOND}}"
        );
    }

    #[test]
    fn malformed_keyring_reference_is_an_error() {
        let resolved = resolve_placeholders(&map(&[("A", "{{keyring:no-account}}")]));
        let err = resolved.first_error.expect("expected an error");
        assert!(matches!(err.source, PlaceholderError::KeyringFormat { .. }));
    }

    #[test]
    fn unknown_placeholder_type_is_an_error() {
        let resolved = resolve_placeholders(&map(&[("A", "{{vault:secret/path}}")]));
        let err = resolved.first_error.expect("expected an error");
        assert!(matches!(
            err.source,
            PlaceholderError::UnknownType { ref kind } if kind == "vault"
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let resolved =
            resolve_placeholders(&map(&[("A", "{{file:/nonexistent/ithena/test/path}}")]));
        let err = resolved.first_error.expect("expected an error");
        assert!(matches!(err.source, PlaceholderError::File { .. }));
    }

    #[test]
    fn resolution_is_idempotent_on_placeholder_free_strings() {
        let input = map(&[("A", "no placeholders here"), ("B", "")]);
        let once = resolve_placeholders(&input);
        let twice = resolve_placeholders(&once.env);
        assert_eq!(once.env, twice.env);
    }
}
