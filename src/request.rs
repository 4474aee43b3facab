//! Normalized view of an incoming request.
//!
//! A [`RequestView`] is built once per request and shared by every condition
//! evaluated for it, so the query string and JSON body are parsed exactly once.

use std::collections::HashMap;

/// Read-only projection of an inbound HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestView {
    method: String,
    path: String,
    /// Lowercased names; first value wins
    headers: HashMap<String, String>,
    query_string: String,
    query: Vec<(String, String)>,
    body: Vec<u8>,
    body_text: String,
    json: Option<serde_json::Value>,
    path_params: HashMap<String, String>,
    remote_addr: Option<String>,
}

impl RequestView {
    /// Start building a view for `method` and the concrete request `path`.
    pub fn builder(method: &str, path: &str) -> RequestViewBuilder {
        RequestViewBuilder {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            query_string: None,
            body: Vec::new(),
            path_params: HashMap::new(),
            path_template: None,
            remote_addr: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers, lowercased names.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn body_text(&self) -> &str {
        &self.body_text
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }
}

/// Builder for [`RequestView`].
#[derive(Debug, Clone)]
pub struct RequestViewBuilder {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    query_string: Option<String>,
    body: Vec<u8>,
    path_params: HashMap<String, String>,
    path_template: Option<String>,
    remote_addr: Option<String>,
}

impl RequestViewBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Raw query string, with or without the leading `?`.
    pub fn query_string(mut self, query: &str) -> Self {
        self.query_string = Some(query.trim_start_matches('?').to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set an already extracted path parameter.
    pub fn path_param(mut self, name: &str, value: &str) -> Self {
        self.path_params.insert(name.to_string(), value.to_string());
        self
    }

    /// Extract path parameters by matching the request path against the
    /// endpoint's pattern (e.g. `/users/{id}`). Explicit `path_param` values
    /// take precedence.
    pub fn path_template(mut self, template: &str) -> Self {
        self.path_template = Some(template.to_string());
        self
    }

    pub fn remote_addr(mut self, addr: &str) -> Self {
        self.remote_addr = Some(addr.to_string());
        self
    }

    pub fn build(self) -> RequestView {
        let mut headers = HashMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            headers.entry(name.to_ascii_lowercase()).or_insert(value);
        }

        let query_string = self.query_string.unwrap_or_default();
        let query = parse_query_string(&query_string);

        let body_text = String::from_utf8_lossy(&self.body).into_owned();
        let json = if body_text.trim().is_empty() {
            None
        } else {
            serde_json::from_slice(&self.body).ok()
        };

        let mut path_params = self
            .path_template
            .as_deref()
            .and_then(|t| PathTemplate::parse(t).matches(&self.path))
            .unwrap_or_default();
        path_params.extend(self.path_params);

        RequestView {
            method: self.method.to_uppercase(),
            path: self.path,
            headers,
            query_string,
            query,
            body: self.body,
            body_text,
            json,
            path_params,
            remote_addr: self.remote_addr,
        }
    }
}

/// Parse a query string into ordered key-value pairs.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Endpoint path pattern such as `/users/{id}/posts/{post_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = template
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => TemplateSegment::Param(name.to_string()),
                None => match s.strip_prefix(':') {
                    Some(name) if !name.is_empty() => TemplateSegment::Param(name.to_string()),
                    _ => TemplateSegment::Literal(s.to_string()),
                },
            })
            .collect();

        Self { segments }
    }

    /// Match a concrete path, returning the extracted parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                TemplateSegment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_view() {
        let view = RequestView::builder("post", "/users/42")
            .header("X-Env", "prod")
            .header("x-env", "staging")
            .query_string("?debug=0&tag=a&tag=b")
            .body(r#"{"user": {"id": 7}}"#)
            .path_template("/users/{id}")
            .build();

        assert_eq!(view.method(), "POST");
        assert_eq!(view.header("X-ENV"), Some("prod"));
        assert_eq!(view.query_param("debug"), Some("0"));
        assert_eq!(view.query_param("tag"), Some("a"));
        assert_eq!(view.query_param("missing"), None);
        assert_eq!(view.path_param("id"), Some("42"));
        assert_eq!(view.json().unwrap()["user"]["id"], 7);
    }

    #[test]
    fn test_non_json_body() {
        let view = RequestView::builder("POST", "/")
            .body("plain text")
            .build();
        assert!(view.json().is_none());
        assert_eq!(view.body_text(), "plain text");

        let empty = RequestView::builder("GET", "/").build();
        assert!(empty.json().is_none());
        assert_eq!(empty.body_text(), "");
    }

    #[test]
    fn test_explicit_path_param_wins() {
        let view = RequestView::builder("GET", "/users/42")
            .path_template("/users/{id}")
            .path_param("id", "override")
            .build();
        assert_eq!(view.path_param("id"), Some("override"));
    }

    #[test]
    fn test_path_template() {
        let template = PathTemplate::parse("/users/{id}/posts/{post_id}");
        let params = template.matches("/users/1/posts/abc").unwrap();
        assert_eq!(params.get("id"), Some(&"1".to_string()));
        assert_eq!(params.get("post_id"), Some(&"abc".to_string()));

        assert!(template.matches("/users/1/posts").is_none());
        assert!(template.matches("/users/1/comments/abc").is_none());
    }

    #[test]
    fn test_path_template_colon_params() {
        let template = PathTemplate::parse("/orders/:order");
        let params = template.matches("/orders/99/").unwrap();
        assert_eq!(params.get("order"), Some(&"99".to_string()));
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux");
        assert_eq!(params[0], ("foo".to_string(), "bar".to_string()));
        assert_eq!(params[1], ("baz".to_string(), "qux".to_string()));

        let params = parse_query_string("name=John%20Doe&flag");
        assert_eq!(params[0].1, "John Doe");
        assert_eq!(params[1], ("flag".to_string(), String::new()));
    }
}
