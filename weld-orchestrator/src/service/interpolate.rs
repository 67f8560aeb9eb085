//! Parameter interpolation
//!
//! Values may reference other parameters with `{{.name}}` placeholders,
//! optionally followed by filters: `{{.name | upper}}`, `{{.name | default "x"}}`.
//! References are resolved transitively. Placeholders naming an unknown
//! parameter are left untouched, so interpolating an already resolved set is a
//! no-op.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::error::{InterpolationError, MultiError};

// Constant pattern, checked by the tests below
#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*((?:\|[^|}]*)*)\}\}")
        .expect("constant regex pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    Upper,
    Lower,
    Trim,
    Default(String),
}

fn parse_filters(key: &str, raw: &str) -> Result<Vec<Filter>, InterpolationError> {
    raw.split('|')
        .skip(1)
        .map(str::trim)
        .map(|f| match f {
            "upper" => Ok(Filter::Upper),
            "lower" => Ok(Filter::Lower),
            "trim" => Ok(Filter::Trim),
            _ => f
                .strip_prefix("default")
                .map(str::trim)
                .and_then(|arg| arg.strip_prefix('"'))
                .and_then(|arg| arg.strip_suffix('"'))
                .map(|arg| Filter::Default(arg.to_string()))
                .ok_or_else(|| InterpolationError::UnknownFilter {
                    key: key.to_string(),
                    filter: f.to_string(),
                }),
        })
        .collect()
}

fn apply_filters(value: Option<String>, filters: &[Filter]) -> Option<String> {
    filters.iter().fold(value, |value, filter| match filter {
        Filter::Default(fallback) => match value {
            Some(v) if !v.is_empty() => Some(v),
            _ => Some(fallback.clone()),
        },
        Filter::Upper => value.map(|v| v.to_uppercase()),
        Filter::Lower => value.map(|v| v.to_lowercase()),
        Filter::Trim => value.map(|v| v.trim().to_string()),
    })
}

fn check_terminated(key: &str, template: &str) -> Result<(), InterpolationError> {
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => rest = &after[close + 2..],
            None => {
                return Err(InterpolationError::Unterminated {
                    key: key.to_string(),
                });
            }
        }
    }
    Ok(())
}

struct Resolver<'a> {
    raw: &'a BTreeMap<String, String>,
    done: HashMap<&'a str, Result<String, InterpolationError>>,
    visiting: Vec<&'a str>,
}

impl<'a> Resolver<'a> {
    fn resolve(&mut self, key: &'a str) -> Result<String, InterpolationError> {
        if let Some(result) = self.done.get(key) {
            return result.clone();
        }

        let result = self.expand(key);
        self.done.insert(key, result.clone());
        result
    }

    fn expand(&mut self, key: &'a str) -> Result<String, InterpolationError> {
        let Some(template) = self.raw.get(key) else {
            return Ok(String::new());
        };
        check_terminated(key, template)?;

        self.visiting.push(key);
        let result = self.substitute(key, template);
        self.visiting.pop();
        result
    }

    fn substitute(&mut self, key: &'a str, template: &'a str) -> Result<String, InterpolationError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);
            last = whole.end();
            out.push_str(&self.placeholder(key, &caps)?);
        }

        out.push_str(&template[last..]);
        Ok(out)
    }

    fn placeholder(&mut self, key: &'a str, caps: &Captures<'a>) -> Result<String, InterpolationError> {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return Ok(whole.to_string());
        };
        let filters = parse_filters(key, caps.get(2).map_or("", |m| m.as_str()))?;

        let value = match self.raw.get_key_value(name) {
            Some(_) if self.visiting.contains(&name) => {
                return Err(InterpolationError::Cycle {
                    key: key.to_string(),
                    through: name.to_string(),
                });
            }
            Some((name, _)) => match self.resolve(name) {
                Ok(v) => Some(v),
                // `key` is on the cycle only while the cycle start is still
                // being expanded above it
                Err(InterpolationError::Cycle { through, .. })
                    if self.visiting.iter().any(|v| *v == through) =>
                {
                    return Err(InterpolationError::Cycle {
                        key: key.to_string(),
                        through,
                    });
                }
                // A broken dependency is reported on its own key
                Err(_) => return Ok(whole.to_string()),
            },
            None => None,
        };

        Ok(apply_filters(value, &filters).unwrap_or_else(|| whole.to_string()))
    }
}

/// Interpolates every value of `params` against the other values
///
/// Returns the resolved values, sorted by key, and the aggregated failures.
/// Keys whose value fails to interpolate are left out of the resolved map.
pub fn interpolate(params: &BTreeMap<String, String>) -> (BTreeMap<String, String>, MultiError) {
    let mut resolver = Resolver {
        raw: params,
        done: HashMap::new(),
        visiting: Vec::new(),
    };
    let mut resolved = BTreeMap::new();
    let mut errors = MultiError::new();

    for key in params.keys() {
        match resolver.resolve(key) {
            Ok(value) => {
                resolved.insert(key.clone(), value);
            }
            Err(err) => errors.push(err),
        }
    }

    (resolved, errors)
}

/// Interpolates a single template against `vars`
pub fn interpolate_value(
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, InterpolationError> {
    const KEY: &str = "<template>";
    let mut params = vars.clone();
    params.insert(KEY.to_string(), template.to_string());

    let mut resolver = Resolver {
        raw: &params,
        done: HashMap::new(),
        visiting: Vec::new(),
    };
    resolver.resolve(KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_placeholder_pattern_compiles() {
        assert!(PLACEHOLDER.is_match("{{.cds.project}}"));
        assert!(PLACEHOLDER.is_match("{{ .git.branch | upper }}"));
        assert!(!PLACEHOLDER.is_match("{{cds.project}}"));
    }

    #[test]
    fn test_transitive_substitution() {
        let params = map(&[
            ("a", "{{.b}}-a"),
            ("b", "{{.c}}-b"),
            ("c", "c"),
        ]);
        let (resolved, errors) = interpolate(&params);
        assert!(errors.is_empty());
        assert_eq!(resolved["a"], "c-b-a");
        assert_eq!(resolved["b"], "c-b");
    }

    #[test]
    fn test_unknown_keys_are_left_verbatim() {
        let params = map(&[("a", "x {{.missing}} y")]);
        let (resolved, errors) = interpolate(&params);
        assert!(errors.is_empty());
        assert_eq!(resolved["a"], "x {{.missing}} y");
    }

    #[test]
    fn test_interpolation_is_idempotent() {
        let params = map(&[
            ("cds.project", "PROJ"),
            ("url", "https://{{.host}}/{{.cds.project}}"),
            ("host", "ci.{{.domain | lower}}"),
            ("domain", "EXAMPLE.org"),
            ("other", "{{.nope}}"),
        ]);
        let (once, errors) = interpolate(&params);
        assert!(errors.is_empty());
        let (twice, errors) = interpolate(&once);
        assert!(errors.is_empty());
        assert_eq!(once, twice);
        assert_eq!(once["url"], "https://ci.example.org/PROJ");
    }

    #[test]
    fn test_filters() {
        let params = map(&[
            ("name", "  Weld "),
            ("empty", ""),
            ("up", "{{.name | trim | upper}}"),
            ("low", "{{.name|lower|trim}}"),
            ("fallback", "{{.empty | default \"none\"}}"),
            ("missing", "{{.absent | default \"d\"}}"),
        ]);
        let (resolved, errors) = interpolate(&params);
        assert!(errors.is_empty());
        assert_eq!(resolved["up"], "WELD");
        assert_eq!(resolved["low"], "weld");
        assert_eq!(resolved["fallback"], "none");
        assert_eq!(resolved["missing"], "d");
    }

    #[test]
    fn test_errors_are_collected_not_fatal() {
        let params = map(&[
            ("ok", "fine"),
            ("open", "{{.ok"),
            ("filter", "{{.ok | shout}}"),
            ("a", "{{.b}}"),
            ("b", "{{.a}}"),
            ("uses_open", "<{{.open}}>"),
        ]);
        let (resolved, errors) = interpolate(&params);

        assert_eq!(resolved["ok"], "fine");
        assert_eq!(resolved["uses_open"], "<{{.open}}>");
        assert!(!resolved.contains_key("open"));
        assert!(!resolved.contains_key("filter"));
        assert!(!resolved.contains_key("a"));
        assert!(!resolved.contains_key("b"));

        let mut failed: Vec<&str> = errors.errors().iter().map(|e| e.key()).collect();
        failed.sort();
        assert_eq!(failed, vec!["a", "b", "filter", "open"]);
    }

    #[test]
    fn test_cycle_is_reported_on_its_members_only() {
        let params = map(&[
            ("a", "{{.b}}"),
            ("b", "{{.a}}"),
            ("c", "x{{.a}}"),
            ("d", "{{.c}}!"),
            ("self", "{{.self}}"),
            ("e", "{{.f}}"),
            ("f", "{{.g}}"),
            ("g", "{{.f}}"),
        ]);
        let (resolved, errors) = interpolate(&params);

        assert_eq!(resolved["c"], "x{{.a}}");
        assert_eq!(resolved["d"], "x{{.a}}!");
        assert_eq!(resolved["e"], "{{.f}}");

        let mut failed: Vec<&str> = errors.errors().iter().map(|e| e.key()).collect();
        failed.sort();
        assert_eq!(failed, vec!["a", "b", "f", "g", "self"]);
    }

    #[test]
    fn test_interpolate_value() {
        let vars = map(&[("cds.stage", "build")]);
        assert_eq!(
            interpolate_value("stage={{.cds.stage | upper}}", &vars).unwrap(),
            "stage=BUILD"
        );
        assert!(interpolate_value("{{.cds.stage", &vars).is_err());
    }
}
