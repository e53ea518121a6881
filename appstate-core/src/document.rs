/*!
State document model and session identity.

A state document is a single JSON object whose top-level keys are component
ids and whose values are opaque component sub-documents. Key order is kept
exactly as parsed or inserted; restoration walks the keys in that order.
*/

use crate::{AppStateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Component id of the workspace layout provider.
pub const WORKSPACE: &str = "workspace";

/// Key holding per-perspective layouts inside the workspace sub-document.
pub const PERSPECTIVES: &str = "perspectives";

/// Key holding part stack layouts inside a perspective.
pub const PART_STACKS: &str = "partStacks";

/// Identity of the session whose document is loaded and saved.
///
/// Usually the workspace or user id handed out by the application shell.
/// The id becomes a directory name, so it must be a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    /// Create a session key, rejecting blank ids and ids that are not a
    /// single path component
    ///
    /// # Example
    /// ```rust
    /// use appstate_core::SessionKey;
    ///
    /// let key = SessionKey::new("ws-42").unwrap();
    /// assert_eq!(key.as_str(), "ws-42");
    /// assert!(SessionKey::new("  ").is_err());
    /// assert!(SessionKey::new("../ws-42").is_err());
    /// ```
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AppStateError::validation("Session id should be defined"));
        }
        if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            return Err(AppStateError::validation(format!(
                "Session id '{}' is not a valid path component",
                id.escape_default()
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionKey {
    type Error = AppStateError;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The full session state, keyed by component id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDocument(Map<String, Value>);

impl StateDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse a document from its JSON text
    ///
    /// Blank text, invalid JSON and any top level other than an object are
    /// rejected; the transport contract uses an empty string for "no state".
    pub fn parse(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Err(AppStateError::invalid_format("document is empty"));
        }
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Wrap an already parsed JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AppStateError::invalid_format(format!(
                "expected an object at top level, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Compact JSON text; this is the form compared for write suppression
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn get(&self, component_id: &str) -> Option<&Value> {
        self.0.get(component_id)
    }

    pub fn insert<S: Into<String>>(&mut self, component_id: S, state: Value) -> Option<Value> {
        self.0.insert(component_id.into(), state)
    }

    pub fn remove(&mut self, component_id: &str) -> Option<Value> {
        self.0.shift_remove(component_id)
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.0.contains_key(component_id)
    }

    /// Component ids in document order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Look up a part stack layout under a perspective
    ///
    /// Follows `workspace → perspectives → perspective_id → partStacks → scope_key`
    /// and returns `None` at the first missing or non-object level. Documents
    /// written by older clients often stop short of the full path.
    pub fn state_for(&self, perspective_id: &str, scope_key: &str) -> Option<&Value> {
        self.0
            .get(WORKSPACE)?
            .get(PERSPECTIVES)?
            .get(perspective_id)?
            .get(PART_STACKS)?
            .get(scope_key)
    }
}

impl From<Map<String, Value>> for StateDocument {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Well-known part stack slots of a perspective layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartStackType {
    Navigation,
    Information,
    Editing,
    Tooling,
}

impl PartStackType {
    pub const ALL: [PartStackType; 4] = [
        PartStackType::Navigation,
        PartStackType::Information,
        PartStackType::Editing,
        PartStackType::Tooling,
    ];

    /// Key used for this slot in `partStacks`
    pub fn as_str(&self) -> &'static str {
        match self {
            PartStackType::Navigation => "NAVIGATION",
            PartStackType::Information => "INFORMATION",
            PartStackType::Editing => "EDITING",
            PartStackType::Tooling => "TOOLING",
        }
    }
}

impl AsRef<str> for PartStackType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for PartStackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keeps_key_order() {
        let doc = StateDocument::parse(r#"{"zeta": 1, "alpha": 2, "mid": {"b": 1, "a": 2}}"#)
            .unwrap();
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(doc.to_json().unwrap(), r#"{"zeta":1,"alpha":2,"mid":{"b":1,"a":2}}"#);
    }

    #[test]
    fn test_parse_rejects_blank_and_malformed() {
        assert!(matches!(
            StateDocument::parse(""),
            Err(AppStateError::InvalidFormat(_))
        ));
        assert!(matches!(
            StateDocument::parse("   \n"),
            Err(AppStateError::InvalidFormat(_))
        ));
        assert!(matches!(
            StateDocument::parse("{not json"),
            Err(AppStateError::Json(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_object_top_level() {
        let err = StateDocument::parse("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert!(StateDocument::parse("null").is_err());
    }

    #[test]
    fn test_remove_preserves_remaining_order() {
        let mut doc = StateDocument::parse(r#"{"a": 1, "b": 2, "c": 3}"#).unwrap();
        assert_eq!(doc.remove("b"), Some(json!(2)));
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert!(!doc.contains("b"));
    }

    #[test]
    fn test_state_for_full_path() {
        let doc = StateDocument::from_value(json!({
            "workspace": {
                "perspectives": {
                    "p1": {"partStacks": {"LEFT": {"size": 300}}}
                }
            }
        }))
        .unwrap();

        assert_eq!(doc.state_for("p1", "LEFT"), Some(&json!({"size": 300})));
        assert_eq!(doc.state_for("p2", "LEFT"), None);
        assert_eq!(doc.state_for("p1", "RIGHT"), None);
    }

    #[test]
    fn test_state_for_partial_documents() {
        let partials = [
            json!({}),
            json!({"workspace": {}}),
            json!({"workspace": {"perspectives": {}}}),
            json!({"workspace": {"perspectives": {"p1": {}}}}),
            json!({"workspace": {"perspectives": {"p1": {"partStacks": {}}}}}),
            json!({"workspace": "not an object"}),
            json!({"workspace": {"perspectives": ["p1"]}}),
        ];

        for partial in partials {
            let doc = StateDocument::from_value(partial.clone()).unwrap();
            assert_eq!(doc.state_for("p1", "LEFT"), None, "document: {partial}");
        }
    }

    #[test]
    fn test_session_key_validation() {
        assert!(SessionKey::new("").is_err());
        let key = SessionKey::new("workspace-1").unwrap();
        assert_eq!(key.to_string(), "workspace-1");
    }

    #[test]
    fn test_session_key_must_be_one_path_component() {
        for id in ["x/../../escaped", "..", ".", "a\\b", "/etc", "nul\0"] {
            assert!(
                matches!(SessionKey::new(id), Err(AppStateError::Validation(_))),
                "accepted {id:?}"
            );
        }
        assert!(SessionKey::new("ws..1").is_ok());

        let err = serde_json::from_str::<SessionKey>(r#""../ws1""#).unwrap_err();
        assert!(err.to_string().contains("not a valid path component"));
        let key: SessionKey = serde_json::from_str(r#""ws1""#).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""ws1""#);
    }

    #[test]
    fn test_part_stack_names() {
        let names: Vec<&str> = PartStackType::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["NAVIGATION", "INFORMATION", "EDITING", "TOOLING"]);
    }
}
