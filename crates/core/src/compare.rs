//! Comparison directives
//!
//! A baseline may replace any value with an object carrying a `_t` field, e.g.
//! `{"_t": "regex", "value": "^v\\d+"}`. Such an object is resolved into a
//! [`Comparator`] which decides equality instead of a plain `==`.

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::context::ContextStore;
use crate::error::{Error, Result};

/// Discriminator field marking a comparison directive
pub const TYPE_FIELD: &str = "_t";

/// Payload field of a comparison directive
pub const VALUE_FIELD: &str = "value";

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A[a-f0-9]{32}").expect("static regex")
});

static ISO8601_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\A\d{4}-\d{1,2}-\d{1,2}",
        r"(?:[T ]\d{1,2}:\d{1,2}(?::\d{1,2}(?:\.\d{1,12})?)?",
        r"(?:Z|[+-]\d{2}:?\d{2})?)?\z",
    ))
    .expect("static regex")
});

/// Directive kinds recognised in a `_t` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Equal,
    String,
    Regex,
    Uuid,
    Date,
    Iso8601,
    SelfRef,
    Hash,
}

impl FromStr for DirectiveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "equal" => Ok(DirectiveKind::Equal),
            "string" => Ok(DirectiveKind::String),
            "regex" => Ok(DirectiveKind::Regex),
            "uuid" => Ok(DirectiveKind::Uuid),
            "date" => Ok(DirectiveKind::Date),
            "iso-8601" => Ok(DirectiveKind::Iso8601),
            "self" => Ok(DirectiveKind::SelfRef),
            "hash" => Ok(DirectiveKind::Hash),
            other => Err(Error::UnknownComparator(other.to_string())),
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            DirectiveKind::Equal => "equal",
            DirectiveKind::String => "string",
            DirectiveKind::Regex => "regex",
            DirectiveKind::Uuid => "uuid",
            DirectiveKind::Date => "date",
            DirectiveKind::Iso8601 => "iso-8601",
            DirectiveKind::SelfRef => "self",
            DirectiveKind::Hash => "hash",
        };
        write!(f, "{tag}")
    }
}

impl DirectiveKind {
    /// Build a bare directive object of this kind
    pub fn directive(self) -> Value {
        let mut map = Map::new();
        map.insert(TYPE_FIELD.to_string(), Value::String(self.to_string()));
        Value::Object(map)
    }

    /// Build a directive object carrying a value
    pub fn directive_with(self, value: impl Into<Value>) -> Value {
        let mut directive = self.directive();
        if let Value::Object(map) = &mut directive {
            map.insert(VALUE_FIELD.to_string(), value.into());
        }
        directive
    }
}

/// Placeholder leaf substituted for bodies that are not structured data
pub fn hash_placeholder(digest: impl Into<String>) -> Value {
    DirectiveKind::Hash.directive_with(digest.into())
}

/// A resolved comparison directive
#[derive(Debug, Clone)]
pub enum Comparator<'a> {
    /// Deep equality with the wrapped value
    Equal(Value),
    /// Any string
    String,
    /// String matching the pattern from its start
    Regex(Regex),
    /// 32 lowercase hex digits at the start of a string
    Uuid,
    /// RFC 2822 style HTTP date
    Date,
    /// ISO-8601 date or timestamp
    Iso8601,
    /// Template rendered against the run context, coerced to the candidate's type
    SelfRef {
        template: String,
        context: &'a ContextStore,
    },
    /// Content digest placeholder for unstructured bodies
    Hash(Value),
}

impl<'a> Comparator<'a> {
    /// Resolve `value` into a comparator if it is a directive object
    ///
    /// Returns `Ok(None)` for plain values. Unknown tags and a `self` directive
    /// without a context are errors.
    pub fn resolve(value: &Value, context: Option<&'a ContextStore>) -> Result<Option<Self>> {
        match directive_kind(value)? {
            Some(kind) => {
                let payload = value.get(VALUE_FIELD);
                Self::build(kind, payload, context).map(Some)
            }
            None => Ok(None),
        }
    }

    fn build(
        kind: DirectiveKind,
        payload: Option<&Value>,
        context: Option<&'a ContextStore>,
    ) -> Result<Self> {
        let comparator = match kind {
            DirectiveKind::Equal => Comparator::Equal(payload.cloned().unwrap_or(Value::Null)),
            DirectiveKind::String => Comparator::String,
            DirectiveKind::Regex => {
                let pattern = payload_str(kind, payload)?;
                let regex = Regex::new(&format!(r"\A(?:{pattern})"))
                    .map_err(|e| Error::InvalidDirective(format!("bad regex `{pattern}`: {e}")))?;
                Comparator::Regex(regex)
            }
            DirectiveKind::Uuid => Comparator::Uuid,
            DirectiveKind::Date => Comparator::Date,
            DirectiveKind::Iso8601 => Comparator::Iso8601,
            DirectiveKind::SelfRef => {
                let template = payload_str(kind, payload)?.to_string();
                let context = context.ok_or(Error::MissingContext)?;
                Comparator::SelfRef { template, context }
            }
            DirectiveKind::Hash => Comparator::Hash(payload.cloned().unwrap_or(Value::Null)),
        };
        Ok(comparator)
    }

    /// Does `candidate` satisfy this comparator?
    pub fn matches(&self, candidate: &Value) -> Result<bool> {
        let matched = match self {
            Comparator::Equal(expected) => values_equal(expected, candidate),
            Comparator::String => candidate.is_string(),
            Comparator::Regex(re) => candidate.as_str().is_some_and(|s| re.is_match(s)),
            Comparator::Uuid => candidate.as_str().is_some_and(|s| UUID_RE.is_match(s)),
            Comparator::Date => candidate
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc2822(s.trim()).is_ok()),
            Comparator::Iso8601 => candidate.as_str().is_some_and(|s| ISO8601_RE.is_match(s)),
            Comparator::SelfRef { template, context } => {
                let rendered = context.render(template)?;
                coerced_equal(&rendered, candidate)
            }
            Comparator::Hash(digest) => {
                directive_kind(candidate).ok().flatten() == Some(DirectiveKind::Hash)
                    && candidate.get(VALUE_FIELD).unwrap_or(&Value::Null) == digest
            }
        };
        Ok(matched)
    }
}

/// Kind of the directive `value` represents, if any
pub fn directive_kind(value: &Value) -> Result<Option<DirectiveKind>> {
    let Some(tag) = value.as_object().and_then(|map| map.get(TYPE_FIELD)) else {
        return Ok(None);
    };
    match tag {
        Value::String(tag) => tag.parse().map(Some),
        other => Err(Error::InvalidDirective(format!(
            "`{TYPE_FIELD}` must be a string, got {other}"
        ))),
    }
}

/// Check every directive in a tree without needing a context
///
/// Lets a run fail on a malformed baseline before any request goes out.
pub fn validate_directives(value: &Value) -> Result<()> {
    if let Some(kind) = directive_kind(value)? {
        let payload = value.get(VALUE_FIELD);
        match kind {
            DirectiveKind::Regex => {
                Comparator::build(kind, payload, None)?;
            }
            DirectiveKind::SelfRef => {
                payload_str(kind, payload)?;
            }
            _ => {}
        }
        return Ok(());
    }

    match value {
        Value::Object(map) => map.values().try_for_each(validate_directives),
        Value::Array(items) => items.iter().try_for_each(validate_directives),
        _ => Ok(()),
    }
}

/// Deep equality where numbers compare by value, so `1` equals `1.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, x)| y.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn payload_str(kind: DirectiveKind, payload: Option<&Value>) -> Result<&str> {
    payload.and_then(Value::as_str).ok_or_else(|| {
        Error::InvalidDirective(format!("`{kind}` directive requires a string `{VALUE_FIELD}`"))
    })
}

/// Coerce rendered template text into the candidate's JSON type and compare
fn coerced_equal(rendered: &str, candidate: &Value) -> bool {
    match candidate {
        Value::String(s) => rendered == s,
        Value::Bool(b) => match rendered.trim().to_ascii_lowercase().as_str() {
            "true" => *b,
            "false" => !*b,
            _ => false,
        },
        Value::Number(n) => {
            let text = rendered.trim();
            if let (Some(expected), Ok(actual)) = (n.as_i64(), text.parse::<i64>()) {
                return expected == actual;
            }
            if let (Some(expected), Ok(actual)) = (n.as_u64(), text.parse::<u64>()) {
                return expected == actual;
            }
            match (n.as_f64(), text.parse::<f64>()) {
                (Some(expected), Ok(actual)) => expected == actual,
                _ => false,
            }
        }
        Value::Null => matches!(rendered.trim(), "" | "null"),
        Value::Array(_) | Value::Object(_) => {
            serde_json::from_str::<Value>(rendered).is_ok_and(|parsed| values_equal(&parsed, candidate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextEntry;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn check(directive: Value, candidate: Value) -> bool {
        Comparator::resolve(&directive, None)
            .unwrap()
            .expect("directive")
            .matches(&candidate)
            .unwrap()
    }

    fn login_context() -> ContextStore {
        let mut store = ContextStore::new();
        store
            .record(ContextEntry {
                name: "login".into(),
                method: "POST".into(),
                url: "/login".into(),
                params: BTreeMap::new(),
                body: json!({"token": "abc123", "user_id": 42, "admin": true, "scopes": ["a", "b"]}),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_plain_values_are_not_directives() {
        assert!(Comparator::resolve(&json!({"value": 1}), None).unwrap().is_none());
        assert!(Comparator::resolve(&json!("regex"), None).unwrap().is_none());
    }

    #[test]
    fn test_equal() {
        assert!(check(json!({"_t": "equal", "value": {"a": [1, 2]}}), json!({"a": [1, 2]})));
        assert!(!check(json!({"_t": "equal", "value": 1}), json!(2)));
    }

    #[test]
    fn test_numbers_equal_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, {"b": 2.0}]}), &json!({"a": [1.0, {"b": 2}]})));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX)));
        assert!(!values_equal(&json!(-1), &json!(u64::MAX)));
        assert!(!values_equal(&json!(1), &json!(1.5)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(check(json!({"_t": "equal", "value": [3]}), json!([3.0])));
    }

    #[test]
    fn test_string() {
        assert!(check(json!({"_t": "string"}), json!("anything")));
        assert!(!check(json!({"_t": "string"}), json!(12)));
    }

    #[test]
    fn test_regex_anchored_at_start() {
        let directive = json!({"_t": "regex", "value": "^ab"});
        assert!(check(directive.clone(), json!("abc")));
        assert!(!check(directive, json!("xab")));

        let unanchored = json!({"_t": "regex", "value": "ab"});
        assert!(check(unanchored.clone(), json!("abz")));
        assert!(!check(unanchored.clone(), json!("zab")));
        assert!(!check(unanchored, json!(5)));
    }

    #[test]
    fn test_regex_invalid_pattern() {
        let err = Comparator::resolve(&json!({"_t": "regex", "value": "("}), None).unwrap_err();
        assert!(matches!(err, Error::InvalidDirective(_)));
    }

    #[test]
    fn test_uuid() {
        let directive = json!({"_t": "uuid"});
        assert!(check(directive.clone(), json!("0123456789abcdef0123456789abcdef")));
        assert!(!check(directive.clone(), json!("not-a-uuid")));
        assert!(!check(directive.clone(), json!("0123456789ABCDEF0123456789ABCDEF")));
        // Only the prefix is checked
        assert!(check(directive, json!("0123456789abcdef0123456789abcdef-trailing")));
    }

    #[test]
    fn test_date() {
        let directive = json!({"_t": "date"});
        assert!(check(directive.clone(), json!("Mon, 20 Nov 1995 19:12:08 GMT")));
        assert!(check(directive.clone(), json!("Tue, 15 Nov 1994 08:12:31 +0000")));
        assert!(!check(directive.clone(), json!("yesterday")));
        assert!(!check(directive, json!(0)));
    }

    #[test]
    fn test_iso8601() {
        let directive = json!({"_t": "iso-8601"});
        for ok in [
            "2024-01-31",
            "2024-01-31T12:30",
            "2024-01-31T12:30:45",
            "2024-01-31 12:30:45.123456",
            "2024-01-31T12:30:45Z",
            "2024-01-31T12:30:45.5+02:00",
            "2024-01-31T12:30:45-0500",
        ] {
            assert!(check(directive.clone(), json!(ok)), "{ok} should match");
        }
        for bad in ["2024/01/31", "31-01-2024", "2024-01-31T12", "2024-01-31T12:30:45 junk"] {
            assert!(!check(directive.clone(), json!(bad)), "{bad} should not match");
        }
    }

    #[test]
    fn test_self_reference() {
        let store = login_context();
        let directive = json!({"_t": "self", "value": "{{login.body.token}}"});
        let comparator = Comparator::resolve(&directive, Some(&store)).unwrap().unwrap();
        assert!(comparator.matches(&json!("abc123")).unwrap());
        assert!(!comparator.matches(&json!("xyz")).unwrap());
    }

    #[test]
    fn test_self_reference_coerces_types() {
        let store = login_context();
        let eval = |template: &str, candidate: Value| {
            Comparator::resolve(&json!({"_t": "self", "value": template}), Some(&store))
                .unwrap()
                .unwrap()
                .matches(&candidate)
                .unwrap()
        };

        assert!(eval("{{login.body.user_id}}", json!(42)));
        assert!(!eval("{{login.body.user_id}}", json!(43)));
        assert!(eval("{{login.body.user_id}}", json!(42.0)));
        assert!(eval("{{login.body.admin}}", json!(true)));
        assert!(eval("{{login.body.scopes}}", json!(["a", "b"])));
        assert!(eval("{{login.body.missing}}", Value::Null));
        assert!(!eval("{{login.body.token}}", json!(1)));
    }

    #[test]
    fn test_self_requires_context() {
        let err = Comparator::resolve(&json!({"_t": "self", "value": "{{x}}"}), None).unwrap_err();
        assert!(matches!(err, Error::MissingContext));
    }

    #[test]
    fn test_unknown_tag_fails_fast() {
        let err = Comparator::resolve(&json!({"_t": "fuzzy", "value": 1}), None).unwrap_err();
        assert!(matches!(err, Error::UnknownComparator(tag) if tag == "fuzzy"));

        let err = Comparator::resolve(&json!({"_t": 3}), None).unwrap_err();
        assert!(matches!(err, Error::InvalidDirective(_)));
    }

    #[test]
    fn test_hash_placeholder() {
        let baseline = hash_placeholder("deadbeef");
        assert_eq!(baseline, json!({"_t": "hash", "value": "deadbeef"}));
        assert!(check(baseline.clone(), hash_placeholder("deadbeef")));
        assert!(!check(baseline.clone(), hash_placeholder("cafebabe")));
        assert!(!check(baseline, json!("deadbeef")));
    }

    #[test]
    fn test_validate_directives() {
        let good = json!({
            "status_code": 200,
            "headers": {"date": {"_t": "date"}},
            "body": [{"id": {"_t": "uuid"}}, {"token": {"_t": "self", "value": "{{a.b}}"}}]
        });
        validate_directives(&good).unwrap();

        let bad = json!({"body": {"items": [1, {"_t": "nope"}]}});
        assert!(matches!(validate_directives(&bad), Err(Error::UnknownComparator(_))));

        let bad_regex = json!({"body": {"_t": "regex", "value": "[a-"}});
        assert!(matches!(validate_directives(&bad_regex), Err(Error::InvalidDirective(_))));
    }
}
