use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Matches `{{ env.VAR }}` and `{{ env.VAR | default("fallback") }}`
fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([A-Za-z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#).expect("must be valid regex")
    })
}

/// Substitute environment placeholders in raw configuration text
///
/// Comment lines are copied verbatim so a commented-out secret reference
/// does not require the variable to exist.
pub fn expand_env(input: &str) -> anyhow::Result<String> {
    let mut expanded: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            expanded.push(line.to_owned());
            continue;
        }
        expanded.push(expand_line(line)?);
    }

    let mut output = expanded.join("\n");
    if input.ends_with('\n') {
        output.push('\n');
    }
    Ok(output)
}

fn expand_line(line: &str) -> anyhow::Result<String> {
    let mut failure = None;

    let replaced = placeholder().replace_all(line, |caps: &Captures<'_>| {
        let key = &caps[1];
        let fallback = caps.get(2).map(|m| m.as_str());

        match resolve(key, fallback) {
            Ok(value) => value,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(replaced.into_owned()),
    }
}

fn resolve(key: &str, fallback: Option<&str>) -> anyhow::Result<String> {
    let Some(var_name) = key.strip_prefix("env.").filter(|name| !name.contains('.')) else {
        anyhow::bail!("only variables scoped with 'env.' are supported: `{key}`");
    };

    match (std::env::var(var_name), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_owned()),
        (Err(_), None) => anyhow::bail!("environment variable not found: `{var_name}`"),
    }
}
