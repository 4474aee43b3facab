//! Endpoint and response-candidate model.
//!
//! The configuration store hands us mocks in their persisted dashboard shape
//! ([`StoredMock`] / [`StoredResponse`]), where headers and conditions are
//! JSON-encoded strings. [`MockEndpoint::from_stored`] is the only place those
//! strings are parsed; everything downstream works on typed values.

use crate::config::EngineSettings;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;

/// Weight used when a candidate has none (or a non-numeric one).
pub const DEFAULT_WEIGHT: u32 = 100;

/// Status used when a stored status code is absent or not a valid HTTP status.
pub const DEFAULT_STATUS: u16 = 200;

// ---------------------------------------------------------------------------
// Stored shape
// ---------------------------------------------------------------------------

/// A mock endpoint as persisted by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMock {
    pub mock_id: String,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Path pattern, e.g. `/users/{id}`
    pub path: String,

    pub method: String,

    #[serde(default)]
    pub description: Option<String>,

    /// `1`/`0` in the dashboard API, booleans accepted too
    #[serde(default = "flag_on")]
    pub is_active: Flag,

    /// Declared content type of the responses
    #[serde(default)]
    pub response_type: Option<String>,

    #[serde(default)]
    pub response_delay_ms: i64,

    #[serde(default)]
    pub responses: Vec<StoredResponse>,
}

/// A response candidate as persisted by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub response_id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub status_code: Option<i64>,

    /// JSON object encoded as a string
    #[serde(default)]
    pub headers: Option<String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default = "flag_off")]
    pub is_default: Flag,

    #[serde(default)]
    pub weight: Option<serde_json::Value>,

    /// JSON array of conditions encoded as a string
    #[serde(default)]
    pub conditions: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,
}

/// Boolean flag stored either as `0`/`1` or as a real boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(n) => n != 0,
        }
    }
}

fn flag_on() -> Flag {
    Flag::Int(1)
}

fn flag_off() -> Flag {
    Flag::Int(0)
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Which part of the request a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSource {
    Header,
    Query,
    Body,
    Path,
}

/// Comparison applied to the resolved field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Contains,
    Regex,
}

/// A predicate over one facet of the incoming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub source: ConditionSource,

    #[serde(default, deserialize_with = "string_like")]
    pub field: String,

    pub operator: Operator,

    #[serde(default, deserialize_with = "string_like")]
    pub value: String,
}

impl Condition {
    pub fn new(
        source: ConditionSource,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source,
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn header(field: &str, operator: Operator, value: &str) -> Self {
        Self::new(ConditionSource::Header, field, operator, value)
    }

    pub fn query(field: &str, operator: Operator, value: &str) -> Self {
        Self::new(ConditionSource::Query, field, operator, value)
    }

    pub fn body(field: &str, operator: Operator, value: &str) -> Self {
        Self::new(ConditionSource::Body, field, operator, value)
    }

    pub fn path(field: &str, operator: Operator, value: &str) -> Self {
        Self::new(ConditionSource::Path, field, operator, value)
    }
}

/// Accept strings, numbers and booleans for text fields; the dashboard is not
/// strict about what it writes into `value`.
fn string_like<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

/// A condition slot on a candidate. Malformed entries are kept so that they
/// still veto the candidate instead of silently disappearing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCondition {
    Valid(Condition),
    Malformed(String),
}

impl From<Condition> for ParsedCondition {
    fn from(condition: Condition) -> Self {
        ParsedCondition::Valid(condition)
    }
}

/// Parse the stored conditions string. Anything that is not a JSON array
/// yields no conditions.
pub fn parse_conditions(raw: Option<&str>) -> Vec<ParsedCondition> {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return Vec::new(),
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match serde_json::from_value::<Condition>(item) {
                Ok(condition) => ParsedCondition::Valid(condition),
                Err(e) => ParsedCondition::Malformed(e.to_string()),
            })
            .collect(),
        Ok(_) => {
            debug!("Stored conditions are not a JSON array, treating as empty");
            Vec::new()
        }
        Err(e) => {
            debug!(error = %e, "Stored conditions are not valid JSON, treating as empty");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Ordered header list with case-insensitive names. Inserting a name that is
/// already present replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// Parse the stored headers string. Anything that is not a JSON object yields
/// an empty set.
pub fn parse_headers(raw: Option<&str>) -> HeaderSet {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return HeaderSet::new(),
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::String(s) => Some((name, s)),
                serde_json::Value::Number(n) => Some((name, n.to_string())),
                serde_json::Value::Bool(b) => Some((name, b.to_string())),
                _ => None,
            })
            .collect(),
        _ => {
            debug!("Stored headers are not a JSON object, treating as empty");
            HeaderSet::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Engine-facing model
// ---------------------------------------------------------------------------

/// One possible response for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCandidate {
    pub id: String,
    pub name: Option<String>,
    pub status: u16,
    pub headers: HeaderSet,
    /// Raw body template
    pub body: String,
    pub is_default: bool,
    /// Always >= 1
    pub weight: u32,
    pub conditions: Vec<ParsedCondition>,
}

impl ResponseCandidate {
    pub fn new(id: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            status,
            headers: HeaderSet::new(),
            body: body.into(),
            is_default: false,
            weight: DEFAULT_WEIGHT,
            conditions: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = coerce_weight(Some(&serde_json::Value::from(weight)));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<ParsedCondition>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    fn from_stored(stored: &StoredResponse) -> Self {
        Self {
            id: stored.response_id.clone(),
            name: stored.name.clone(),
            status: coerce_status(stored.status_code),
            headers: parse_headers(stored.headers.as_deref()),
            body: stored.body.clone().unwrap_or_default(),
            is_default: stored.is_default.is_set(),
            weight: coerce_weight(stored.weight.as_ref()),
            conditions: parse_conditions(stored.conditions.as_deref()),
        }
    }
}

/// A configured mock endpoint, immutable for the duration of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEndpoint {
    pub id: String,
    pub method: String,
    pub path: String,
    pub is_active: bool,
    /// Content type sent when a candidate does not set its own
    pub content_type: String,
    pub delay: Duration,
    /// In creation order
    pub candidates: Vec<ResponseCandidate>,
}

impl MockEndpoint {
    pub fn new(id: impl Into<String>, method: &str, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.to_uppercase(),
            path: path.into(),
            is_active: true,
            content_type: "application/json".to_string(),
            delay: Duration::ZERO,
            candidates: Vec::new(),
        }
    }

    pub fn with_candidate(mut self, candidate: ResponseCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Build the engine model from the persisted shape.
    ///
    /// Never fails: malformed embedded JSON degrades to empty headers or
    /// conditions, out-of-range numbers are coerced.
    pub fn from_stored(stored: &StoredMock, settings: &EngineSettings) -> Self {
        let mut ordered: Vec<(Option<&str>, ResponseCandidate)> = stored
            .responses
            .iter()
            .map(|r| (r.created_at.as_deref(), ResponseCandidate::from_stored(r)))
            .collect();
        // Stable: equal timestamps keep store order
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let content_type = content_type_for(stored.response_type.as_deref(), settings);

        let delay_ms = stored.response_delay_ms.clamp(0, settings.max_delay_ms as i64) as u64;

        Self {
            id: stored.mock_id.clone(),
            method: stored.method.to_uppercase(),
            path: stored.path.clone(),
            is_active: stored.is_active.is_set(),
            content_type,
            delay: Duration::from_millis(delay_ms),
            candidates: ordered.into_iter().map(|(_, c)| c).collect(),
        }
    }

    /// Candidates flagged as default, in creation order.
    pub fn defaults(&self) -> impl Iterator<Item = &ResponseCandidate> {
        self.candidates.iter().filter(|c| c.is_default)
    }
}

/// Content type for a stored response type. The dashboard stores short
/// codes (`json`, `xml`, `html`); full MIME types pass through and anything
/// else falls back to the configured default.
pub fn content_type_for(response_type: Option<&str>, settings: &EngineSettings) -> String {
    let code = response_type.map(str::trim).unwrap_or_default();
    match code.to_ascii_lowercase().as_str() {
        "json" => "application/json".to_string(),
        "xml" => "application/xml".to_string(),
        "html" => "text/html".to_string(),
        _ if code.contains('/') => code.to_string(),
        _ => settings.default_content_type.clone(),
    }
}

/// Coerce a stored weight: absent or non-numeric gives the default weight,
/// anything at or below zero becomes 1.
pub fn coerce_weight(raw: Option<&serde_json::Value>) -> u32 {
    let number = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(w) if w.is_finite() => {
            if w < 1.0 {
                1
            } else {
                w.min(u32::MAX as f64) as u32
            }
        }
        _ => DEFAULT_WEIGHT,
    }
}

fn coerce_status(raw: Option<i64>) -> u16 {
    match raw {
        Some(code) if (100..=599).contains(&code) => code as u16,
        _ => DEFAULT_STATUS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_response(id: &str) -> StoredResponse {
        StoredResponse {
            response_id: id.to_string(),
            name: None,
            status_code: Some(200),
            headers: None,
            body: Some("{}".to_string()),
            is_default: Flag::Int(0),
            weight: None,
            conditions: None,
            created_at: None,
        }
    }

    fn stored_mock(responses: Vec<StoredResponse>) -> StoredMock {
        StoredMock {
            mock_id: "mock-1".to_string(),
            project_id: None,
            name: None,
            path: "/users/{id}".to_string(),
            method: "get".to_string(),
            description: None,
            is_active: Flag::Int(1),
            response_type: None,
            response_delay_ms: 0,
            responses,
        }
    }

    #[test]
    fn test_parse_conditions() {
        let raw = r#"[
            {"type": "header", "field": "X-Env", "operator": "equals", "value": "prod"},
            {"type": "query", "field": "debug", "operator": "equals", "value": 0}
        ]"#;
        let parsed = parse_conditions(Some(raw));
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0],
            ParsedCondition::Valid(Condition::header("X-Env", Operator::Equals, "prod"))
        );
        assert_eq!(
            parsed[1],
            ParsedCondition::Valid(Condition::query("debug", Operator::Equals, "0"))
        );
    }

    #[test]
    fn test_malformed_conditions_string_is_empty() {
        assert!(parse_conditions(Some("not json")).is_empty());
        assert!(parse_conditions(Some(r#"{"type":"header"}"#)).is_empty());
        assert!(parse_conditions(Some("")).is_empty());
        assert!(parse_conditions(None).is_empty());
    }

    #[test]
    fn test_malformed_condition_element_is_kept() {
        let raw = r#"[{"type": "cookie", "field": "a", "operator": "equals", "value": "b"}]"#;
        let parsed = parse_conditions(Some(raw));
        assert_eq!(parsed.len(), 1);
        assert!(matches!(parsed[0], ParsedCondition::Malformed(_)));
    }

    #[test]
    fn test_parse_headers_preserves_order() {
        let headers = parse_headers(Some(
            r#"{"X-B": "2", "X-A": "1", "X-Num": 3, "X-Obj": {"a": 1}}"#,
        ));
        let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["X-B", "X-A", "X-Num"]);
        assert_eq!(headers.get("x-num"), Some("3"));
    }

    #[test]
    fn test_parse_headers_malformed_is_empty() {
        assert!(parse_headers(Some("{broken")).is_empty());
        assert!(parse_headers(Some("[1,2]")).is_empty());
    }

    #[test]
    fn test_header_set_last_write_wins() {
        let mut headers = HeaderSet::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("X-Other", "1");
        headers.insert("content-type", "application/json");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.iter().next(), Some(("content-type", "application/json")));
    }

    #[test]
    fn test_weight_coercion() {
        assert_eq!(coerce_weight(None), DEFAULT_WEIGHT);
        assert_eq!(coerce_weight(Some(&serde_json::json!("abc"))), DEFAULT_WEIGHT);
        assert_eq!(coerce_weight(Some(&serde_json::json!(null))), DEFAULT_WEIGHT);
        assert_eq!(coerce_weight(Some(&serde_json::json!(0))), 1);
        assert_eq!(coerce_weight(Some(&serde_json::json!(-5))), 1);
        assert_eq!(coerce_weight(Some(&serde_json::json!(70))), 70);
        assert_eq!(coerce_weight(Some(&serde_json::json!("20"))), 20);
    }

    #[test]
    fn test_from_stored() {
        let mut first = stored_response("r1");
        first.status_code = Some(1000);
        first.headers = Some(r#"{"X-Request-Id": "{{uuid}}"}"#.to_string());
        first.weight = Some(serde_json::json!(0));
        first.is_default = Flag::Bool(true);

        let mut mock = stored_mock(vec![first]);
        mock.response_delay_ms = 50_000;
        mock.is_active = Flag::Int(0);

        let endpoint = MockEndpoint::from_stored(&mock, &EngineSettings::default());
        assert_eq!(endpoint.method, "GET");
        assert!(!endpoint.is_active);
        assert_eq!(endpoint.delay, Duration::from_millis(10_000));
        assert_eq!(endpoint.content_type, "application/json");

        let candidate = &endpoint.candidates[0];
        assert_eq!(candidate.status, DEFAULT_STATUS);
        assert_eq!(candidate.weight, 1);
        assert!(candidate.is_default);
        assert_eq!(candidate.headers.get("x-request-id"), Some("{{uuid}}"));
    }

    #[test]
    fn test_from_stored_orders_by_creation() {
        let mut late = stored_response("late");
        late.created_at = Some("2025-02-01T00:00:00Z".to_string());
        let mut early = stored_response("early");
        early.created_at = Some("2025-01-01T00:00:00Z".to_string());
        let mut early_too = stored_response("early-too");
        early_too.created_at = Some("2025-01-01T00:00:00Z".to_string());

        let mock = stored_mock(vec![late, early, early_too]);
        let endpoint = MockEndpoint::from_stored(&mock, &EngineSettings::default());
        let ids: Vec<_> = endpoint.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "early-too", "late"]);
    }

    #[test]
    fn test_stored_mock_from_dashboard_json() {
        let json = r#"{
            "mock_id": "m1",
            "project_id": "p1",
            "name": "Get user",
            "path": "/users/{id}",
            "method": "GET",
            "description": "",
            "is_active": 1,
            "response_type": "application/xml",
            "response_delay_ms": 250,
            "responses": [{
                "response_id": "r1",
                "mock_id": "m1",
                "name": "ok",
                "status_code": 201,
                "headers": "{}",
                "body": "<ok/>",
                "is_default": 1,
                "weight": 100,
                "conditions": "[]",
                "created_at": "2025-01-01T00:00:00Z"
            }]
        }"#;
        let stored: StoredMock = serde_json::from_str(json).unwrap();
        let endpoint = MockEndpoint::from_stored(&stored, &EngineSettings::default());
        assert_eq!(endpoint.content_type, "application/xml");
        assert_eq!(endpoint.delay, Duration::from_millis(250));
        assert_eq!(endpoint.candidates[0].status, 201);
        assert!(endpoint.candidates[0].is_default);
    }

    #[test]
    fn test_response_type_codes_map_to_mime_types() {
        let settings = EngineSettings::default();
        for (code, expected) in [
            ("json", "application/json"),
            ("xml", "application/xml"),
            ("html", "text/html"),
            (" XML ", "application/xml"),
            ("text/csv", "text/csv"),
            ("yaml", "application/json"),
            ("", "application/json"),
        ] {
            let mut mock = stored_mock(vec![stored_response("r1")]);
            mock.response_type = Some(code.to_string());
            let endpoint = MockEndpoint::from_stored(&mock, &settings);
            assert_eq!(endpoint.content_type, expected, "response_type {:?}", code);
        }

        let custom = EngineSettings {
            default_content_type: "text/plain".to_string(),
            ..EngineSettings::default()
        };
        assert_eq!(content_type_for(None, &custom), "text/plain");
        assert_eq!(content_type_for(Some("json"), &custom), "application/json");
    }
}
