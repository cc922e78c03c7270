//! `${VAR}` interpolation for configuration values.
//!
//! Resolution is a separate pass run over a configuration value tree right
//! before a provider is constructed. Manifests keep the unresolved form, so
//! secrets referenced by name are never written to disk.

use anyhow::{bail, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env pattern"))
}

/// Replace every `${NAME}` in `input` with the value of the environment
/// variable `NAME`. Fails on the first unset variable.
pub fn resolve_str(input: &str) -> Result<String> {
    resolve_str_with(input, |name| std::env::var(name).ok())
}

/// Like [`resolve_str`], with a caller-supplied variable lookup.
pub fn resolve_str_with<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in pattern().captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let value = match lookup(name) {
            Some(v) => v,
            None => bail!("Environment variable {} not found", name),
        };
        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Resolve every string inside a YAML value tree.
pub fn resolve_value(value: Value) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_str(&s)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(resolve_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, resolve_value(v)?);
            }
            Value::Mapping(out)
        }
        Value::Tagged(tagged) => {
            let tagged = *tagged;
            Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                tag: tagged.tag,
                value: resolve_value(tagged.value)?,
            }))
        }
        other => other,
    })
}

/// Round-trip a typed config through YAML, resolving all `${VAR}` strings.
pub fn resolve_config<T>(config: &T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let value = serde_yaml::to_value(config)?;
    let resolved = resolve_value(value)?;
    Ok(serde_yaml::from_value(resolved)?)
}
