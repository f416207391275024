use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Matches `{{ scope.NAME }}` with an optional `| default("value")` filter
fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*(?P<key>[A-Za-z0-9_.]+)\s*(?:\|\s*default\("(?P<default>[^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is a valid regex")
    })
}

/// Substitute `{{ env.NAME }}` placeholders in raw config text
///
/// `{{ env.NAME | default("value") }}` falls back to `value` when the variable
/// is unset. Comment lines are copied through untouched so disabled settings
/// never require their variables to exist.
pub(crate) fn expand_env(input: &str) -> Result<String, String> {
    let mut expanded = input
        .lines()
        .map(expand_line)
        .collect::<Result<Vec<_>, _>>()?
        .join("\n");

    if input.ends_with('\n') {
        expanded.push('\n');
    }

    Ok(expanded)
}

fn expand_line(line: &str) -> Result<String, String> {
    if line.trim_start().starts_with('#') {
        return Ok(line.to_string());
    }

    let mut failure = None;

    let replaced = placeholder().replace_all(line, |caps: &Captures<'_>| {
        match resolve(&caps["key"], caps.name("default").map(|m| m.as_str())) {
            Ok(value) => value,
            Err(message) => {
                failure.get_or_insert(message);
                String::new()
            }
        }
    });

    match failure {
        Some(message) => Err(message),
        None => Ok(replaced.into_owned()),
    }
}

fn resolve(key: &str, default: Option<&str>) -> Result<String, String> {
    let Some(name) = key.strip_prefix("env.").filter(|name| !name.contains('.')) else {
        return Err(format!("only variables scoped with 'env.' are supported: `{key}`"));
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_string()),
        (Err(_), None) => Err(format!("environment variable not found: `{name}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let input = "[llm.providers.anthropic]\ntype = \"anthropic\"\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn api_key_is_substituted() {
        temp_env::with_var("CONDUIT_TEST_KEY", Some("sk-test"), || {
            let result = expand_env("api_key = \"{{ env.CONDUIT_TEST_KEY }}\"").unwrap();
            assert_eq!(result, "api_key = \"sk-test\"");
        });
    }

    #[test]
    fn several_placeholders_across_lines() {
        let vars = [("CONDUIT_A", Some("a")), ("CONDUIT_B", Some("b"))];
        temp_env::with_vars(vars, || {
            let result = expand_env("x = \"{{ env.CONDUIT_A }}-{{env.CONDUIT_B}}\"\ny = \"{{ env.CONDUIT_B }}\"").unwrap();
            assert_eq!(result, "x = \"a-b\"\ny = \"b\"");
        });
    }

    #[test]
    fn unset_variable_is_an_error() {
        temp_env::with_var_unset("CONDUIT_MISSING", || {
            let err = expand_env("api_key = \"{{ env.CONDUIT_MISSING }}\"").unwrap_err();
            assert!(err.contains("CONDUIT_MISSING"));
        });
    }

    #[test]
    fn other_scopes_are_rejected() {
        let err = expand_env("api_key = \"{{ vault.KEY }}\"").unwrap_err();
        assert!(err.contains("only variables scoped with 'env.'"));

        let err = expand_env("api_key = \"{{ env.A.B }}\"").unwrap_err();
        assert!(err.contains("only variables scoped with 'env.'"));
    }

    #[test]
    fn comments_are_not_expanded() {
        temp_env::with_vars([("CONDUIT_SET", Some("value")), ("CONDUIT_UNSET", None::<&str>)], || {
            let input = "  # api_key = \"{{ env.CONDUIT_UNSET }}\"\napi_key = \"{{ env.CONDUIT_SET }}\"";
            let result = expand_env(input).unwrap();
            assert_eq!(result, "  # api_key = \"{{ env.CONDUIT_UNSET }}\"\napi_key = \"value\"");
        });
    }

    #[test]
    fn default_applies_only_when_unset() {
        temp_env::with_var_unset("CONDUIT_REGION", || {
            let result = expand_env("region = \"{{ env.CONDUIT_REGION | default(\"us\") }}\"").unwrap();
            assert_eq!(result, "region = \"us\"");

            let result = expand_env("region = \"{{ env.CONDUIT_REGION | default(\"\") }}\"").unwrap();
            assert_eq!(result, "region = \"\"");
        });

        temp_env::with_var("CONDUIT_REGION", Some("eu"), || {
            let result = expand_env("region = \"{{ env.CONDUIT_REGION | default(\"us\") }}\"").unwrap();
            assert_eq!(result, "region = \"eu\"");
        });
    }
}
