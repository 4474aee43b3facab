//! Dynamic template tokens for response bodies and headers.
//!
//! Recognized tokens:
//!
//! - `{{uuid}}` - a fresh random UUID for every occurrence
//! - `{{iso_date}}` - the current UTC time, RFC 3339 with milliseconds
//!
//! Anything else between braces is left untouched, so literal `{{...}}` text
//! survives interpolation. Substituted values contain no quotes or
//! backslashes, so a token inside a JSON string keeps the document valid.

use crate::model::HeaderSet;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use uuid::Uuid;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("token pattern is valid")
});

/// A template token this engine knows how to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Uuid,
    IsoDate,
}

impl Token {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uuid" => Some(Token::Uuid),
            "iso_date" => Some(Token::IsoDate),
            _ => None,
        }
    }
}

/// Renders template tokens at serve time.
#[derive(Debug, Default, Clone)]
pub struct TemplateEngine;

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        Self
    }

    /// Interpolate a body and its headers. The timestamp is taken once so
    /// every `{{iso_date}}` in one response agrees.
    pub fn interpolate(&self, body: &str, headers: &HeaderSet) -> (String, HeaderSet) {
        let now = Utc::now();
        let body = self.render_at(body, now);
        let headers = headers
            .iter()
            .map(|(name, value)| (name, self.render_at(value, now)))
            .collect();
        (body, headers)
    }

    /// Render a single template string.
    pub fn render(&self, template: &str) -> String {
        self.render_at(template, Utc::now())
    }

    fn render_at(&self, template: &str, now: DateTime<Utc>) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }

        TOKEN
            .replace_all(template, |caps: &Captures| match Token::from_name(&caps[1]) {
                Some(Token::Uuid) => Uuid::new_v4().to_string(),
                Some(Token::IsoDate) => now.to_rfc3339_opts(SecondsFormat::Millis, true),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
