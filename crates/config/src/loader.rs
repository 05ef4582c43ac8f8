use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::Config;

/// Matches `{{ env.SOME_VAR }}` placeholders in the raw TOML text.
fn env_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
            .unwrap_or_else(|e| unreachable!("invalid env placeholder regex: {e}"))
    })
}

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let expanded = expand_env(&content);
    let config: Config = toml::from_str(&expanded)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

/// Expand `{{ env.VAR }}` placeholders against the process environment.
///
/// A missing variable expands to the empty string rather than failing the
/// load: provider blocks whose key resolves empty are skipped at
/// registration time, which is the behavior we want for optional
/// credentials.
fn expand_env(content: &str) -> String {
    env_placeholder()
        .replace_all(content, |caps: &Captures<'_>| {
            let var = &caps[1];
            match std::env::var(var) {
                Ok(value) => value,
                Err(_) => {
                    log::debug!("environment variable {var} not set, expanding to empty string");
                    String::new()
                }
            }
        })
        .into_owned()
}
