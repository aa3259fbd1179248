//! Run-scoped template context
//!
//! Every executed test is recorded here under its name, so that later tests can
//! reference earlier responses with `{{ login.body.token }}`-style placeholders.
//! The store is owned by a single run and grows monotonically until the run ends.
//!
//! Placeholder expressions are either a quoted string literal or a dotted path
//! with optional `[n]` / `["key"]` subscripts. Undefined paths render as the
//! empty string.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{Error, Result};

/// Reserved key holding the in-progress run result
pub const RUN_KEY: &str = "_";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// What the store captures about an executed test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub name: String,
    pub method: String,
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub body: Value,
}

/// Ordered mapping from test name to its captured request/response
#[derive(Debug, Clone)]
pub struct ContextStore {
    root: Map<String, Value>,
    order: Vec<String>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore {
    pub fn new() -> Self {
        let mut root = Map::new();
        root.insert(RUN_KEY.to_string(), serde_json::json!({ "tests": {} }));
        Self {
            root,
            order: Vec::new(),
        }
    }

    /// Set a global variable visible to every template
    pub fn set_global(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// Merge suite-level globals
    pub fn extend_globals(&mut self, globals: &Map<String, Value>) {
        for (key, value) in globals {
            self.root.insert(key.clone(), value.clone());
        }
    }

    /// Fail if `name` would overwrite `_` or a global when recorded
    pub fn ensure_test_name(&self, name: &str) -> Result<()> {
        let taken = self.root.contains_key(name) && !self.order.iter().any(|n| n == name);
        if name == RUN_KEY || taken {
            return Err(Error::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Record an executed test, overwriting any previous entry of the same name
    pub fn record(&mut self, entry: ContextEntry) -> Result<()> {
        self.ensure_test_name(&entry.name)?;
        let name = entry.name.clone();
        let value = serde_json::to_value(entry)?;
        self.root.insert(name.clone(), value);
        if !self.order.contains(&name) {
            self.order.push(name);
        }
        Ok(())
    }

    /// Replace the `_` entry with the current state of the run
    pub fn set_run(&mut self, run: Value) {
        self.root.insert(RUN_KEY.to_string(), run);
    }

    /// Recorded test names in execution order
    pub fn recorded(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Resolve a dotted path such as `login.body.items.0.id`
    pub fn lookup(&self, expr: &str) -> Result<Option<&Value>> {
        let segments = parse_path(expr)?;
        let mut segments = segments.iter();
        let Some(first) = segments.next() else {
            return Ok(None);
        };

        let mut current = match self.root.get(first.as_str()) {
            Some(value) => value,
            None => return Ok(None),
        };

        for segment in segments {
            let next = match current {
                Value::Object(map) => map.get(segment.as_str()),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Render a template string against the recorded tests
    pub fn render(&self, template: &str) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find(OPEN) {
            output.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];
            let end = find_close(after_open).ok_or_else(|| {
                Error::Template(format!("unterminated placeholder in `{template}`"))
            })?;

            let expr = after_open[..end].trim();
            output.push_str(&self.evaluate(expr)?);
            rest = &after_open[end + CLOSE.len()..];
        }

        output.push_str(rest);
        Ok(output)
    }

    /// Render any JSON value: strings are templates, other scalars use their text form
    pub fn render_value(&self, value: &Value) -> Result<String> {
        match value {
            Value::String(s) => self.render(s),
            other => self.render(&value_to_string(other)),
        }
    }

    fn evaluate(&self, expr: &str) -> Result<String> {
        if expr.is_empty() {
            return Err(Error::Template("empty placeholder".to_string()));
        }

        if let Some(literal) = parse_literal(expr)? {
            return Ok(literal);
        }

        match self.lookup(expr)? {
            Some(value) => Ok(value_to_string(value)),
            None => {
                warn!("Template variable `{}` is undefined", expr);
                Ok(String::new())
            }
        }
    }
}

/// Text form used when interpolating a value into a template
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn parse_literal(expr: &str) -> Result<Option<String>> {
    let quote = match expr.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Ok(None),
    };

    let mut literal = String::new();
    let mut escaped = false;
    for (i, c) in expr.char_indices().skip(1) {
        if escaped {
            literal.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            if expr[i + c.len_utf8()..].trim().is_empty() {
                return Ok(Some(literal));
            }
            return Err(Error::Template(format!("unexpected text after literal in `{expr}`")));
        } else {
            literal.push(c);
        }
    }

    Err(Error::Template(format!("unterminated string literal `{expr}`")))
}

/// Byte offset of the closing `}}`, skipping over quoted literals
fn find_close(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if s[i..].starts_with(CLOSE) => return Some(i),
            None => {}
        }
    }
    None
}

fn parse_path(expr: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = expr.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() {
                    return Err(Error::Template(format!("empty path segment in `{expr}`")));
                }
                segments.push(std::mem::take(&mut current));
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut key = String::new();
                let quote = match chars.peek() {
                    Some(&q @ ('"' | '\'')) => {
                        chars.next();
                        Some(q)
                    }
                    _ => None,
                };
                loop {
                    match chars.next() {
                        Some(q) if Some(q) == quote => {
                            if chars.next() != Some(']') {
                                return Err(Error::Template(format!("expected `]` in `{expr}`")));
                            }
                            break;
                        }
                        Some(']') if quote.is_none() => break,
                        Some(c) => key.push(c),
                        None => {
                            return Err(Error::Template(format!("unterminated subscript in `{expr}`")))
                        }
                    }
                }
                segments.push(if quote.is_some() { key } else { key.trim().to_string() });
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => current.push(c),
            c => {
                return Err(Error::Template(format!("unexpected character `{c}` in `{expr}`")));
            }
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn login_store() -> ContextStore {
        let mut store = ContextStore::new();
        store
            .record(ContextEntry {
                name: "login".into(),
                method: "POST".into(),
                url: "http://api.test/login".into(),
                params: BTreeMap::from([("user".to_string(), "alice".to_string())]),
                body: json!({"token": "abc123", "roles": ["admin", "dev"], "ttl": 3600}),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_render_passthrough() {
        let store = ContextStore::new();
        assert_eq!(store.render("/ping?x=1").unwrap(), "/ping?x=1");
    }

    #[test]
    fn test_render_nested_fields() {
        let store = login_store();
        assert_eq!(
            store.render("Bearer {{login.body.token}}").unwrap(),
            "Bearer abc123"
        );
        assert_eq!(store.render("{{ login.method }} {{login.url}}").unwrap(), "POST http://api.test/login");
        assert_eq!(store.render("{{login.params.user}}").unwrap(), "alice");
        assert_eq!(store.render("{{login.body.ttl}}").unwrap(), "3600");
    }

    #[test]
    fn test_render_subscripts() {
        let store = login_store();
        assert_eq!(store.render("{{login.body.roles.1}}").unwrap(), "dev");
        assert_eq!(store.render("{{login.body.roles[0]}}").unwrap(), "admin");
        assert_eq!(store.render("{{login['body'][\"token\"]}}").unwrap(), "abc123");
    }

    #[test]
    fn test_render_literal() {
        let store = ContextStore::new();
        assert_eq!(store.render("{{ \"{{raw}}\" }}").unwrap(), "{{raw}}");
        assert_eq!(store.render("{{'it\\'s'}}").unwrap(), "it's");
    }

    #[test]
    fn test_render_undefined_is_empty() {
        let store = login_store();
        assert_eq!(store.render("x{{missing.thing}}y").unwrap(), "xy");
        assert_eq!(store.render("{{login.body.nope}}").unwrap(), "");
    }

    #[test]
    fn test_render_unterminated_placeholder() {
        let store = ContextStore::new();
        assert!(matches!(store.render("{{oops"), Err(Error::Template(_))));
    }

    #[test]
    fn test_render_objects_as_json() {
        let store = login_store();
        assert_eq!(store.render("{{login.body.roles}}").unwrap(), r#"["admin","dev"]"#);
    }

    #[test]
    fn test_globals_and_run_key() {
        let mut store = ContextStore::new();
        store.set_global("base_url", json!("http://api.test"));
        assert_eq!(store.render("{{base_url}}/x").unwrap(), "http://api.test/x");

        assert_eq!(store.get(RUN_KEY), Some(&json!({"tests": {}})));
        store.set_run(json!({"tests": {"t1": {"response": {"status_code": 201}}}}));
        assert_eq!(store.render("{{_.tests.t1.response.status_code}}").unwrap(), "201");
    }

    #[test]
    fn test_record_overwrites_but_keeps_order() {
        let mut store = login_store();
        store
            .record(ContextEntry {
                name: "second".into(),
                method: "GET".into(),
                url: "/2".into(),
                params: BTreeMap::new(),
                body: Value::Null,
            })
            .unwrap();
        store
            .record(ContextEntry {
                name: "login".into(),
                method: "POST".into(),
                url: "/login".into(),
                params: BTreeMap::new(),
                body: json!({"token": "new"}),
            })
            .unwrap();

        assert_eq!(store.recorded(), ["login".to_string(), "second".to_string()]);
        assert_eq!(store.render("{{login.body.token}}").unwrap(), "new");
    }

    #[test]
    fn test_record_refuses_to_shadow_globals() {
        let mut store = ContextStore::new();
        store.set_global("base_url", json!("http://api.test"));
        let entry = |name: &str| ContextEntry {
            name: name.into(),
            method: "GET".into(),
            url: "/".into(),
            params: BTreeMap::new(),
            body: Value::Null,
        };

        assert!(matches!(store.record(entry("base_url")), Err(Error::ReservedName(_))));
        assert!(matches!(store.record(entry(RUN_KEY)), Err(Error::ReservedName(_))));
        assert_eq!(store.render("{{base_url}}").unwrap(), "http://api.test");
        assert!(store.record(entry("ok")).is_ok());
        assert!(store.ensure_test_name("ok").is_ok());
    }

    #[test]
    fn test_render_value_stringifies_scalars() {
        let store = login_store();
        assert_eq!(store.render_value(&json!(5)).unwrap(), "5");
        assert_eq!(store.render_value(&json!(true)).unwrap(), "true");
        assert_eq!(store.render_value(&json!("{{login.body.token}}")).unwrap(), "abc123");
    }
}
