//! Template rendering for proxy configuration files
//!
//! Templates are plain text with `{{ field }}` placeholders. The fields a
//! template may reference are the change record's `identifier`, `url`,
//! `host` and `port`; unset fields render as the empty string.
//!
//! ```text
//! server {
//!     server_name {{ identifier }};
//!     location / { proxy_pass http://{{ host }}:{{ port }}; }
//! }
//! ```

use crate::record::ChangeRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Failure to load or parse a template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("error reading template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unterminated placeholder starting at byte {offset}")]
    Unterminated { offset: usize },

    #[error("empty placeholder at byte {offset}")]
    EmptyPlaceholder { offset: usize },

    #[error("invalid field name '{name}' at byte {offset}")]
    InvalidFieldName { name: String, offset: usize },
}

/// Failure to execute a parsed template against a record
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template references unknown field '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(TemplateError::Unterminated { offset: offset + start })?;

            let name = after_open[..end].trim();
            if name.is_empty() {
                return Err(TemplateError::EmptyPlaceholder { offset: offset + start });
            }
            if !is_field_name(name) {
                return Err(TemplateError::InvalidFieldName {
                    name: name.to_string(),
                    offset: offset + start,
                });
            }
            segments.push(Segment::Field(name.to_string()));

            let consumed = start + OPEN.len() + end + CLOSE.len();
            rest = &rest[consumed..];
            offset += consumed;
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Field names referenced by the template, in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn execute(&self, record: &ChangeRecord) -> Result<Vec<u8>, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = lookup(record, name)
                        .ok_or_else(|| RenderError::UnknownField(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out.into_bytes())
    }
}

/// Produces configuration file contents from change records
#[derive(Debug, Clone)]
pub struct Renderer {
    template: Template,
}

impl Renderer {
    /// Load and parse the template at `path`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_source(&source)
    }

    pub fn from_source(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            template: Template::parse(source)?,
        })
    }

    /// Render the configuration for a normalized record. Deterministic: the
    /// same record always yields the same bytes.
    pub fn render(&self, record: &ChangeRecord) -> Result<Vec<u8>, RenderError> {
        self.template.execute(record)
    }
}

fn lookup<'a>(record: &'a ChangeRecord, name: &str) -> Option<&'a str> {
    match name {
        "identifier" => Some(record.identifier.as_str()),
        "url" => Some(record.url.as_deref().unwrap_or("")),
        "host" => Some(record.host.as_deref().unwrap_or("")),
        "port" => Some(record.port.as_deref().unwrap_or("")),
        _ => None,
    }
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const NGINX: &str = "server {\n    listen 80;\n    server_name {{ identifier }};\n    location / {\n        proxy_pass http://{{host}}:{{ port }};\n    }\n}\n";

    fn record() -> ChangeRecord {
        let mut record = ChangeRecord::with_url("app1", "http://svc.local:9090");
        record.normalize().unwrap();
        record
    }

    #[test]
    fn test_render_substitutes_fields() {
        let renderer = Renderer::from_source(NGINX).unwrap();
        let out = String::from_utf8(renderer.render(&record()).unwrap()).unwrap();

        assert!(out.contains("server_name app1;"));
        assert!(out.contains("proxy_pass http://svc.local:9090;"));
        assert!(out.starts_with("server {\n"));
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = Renderer::from_source(NGINX).unwrap();
        let first = renderer.render(&record()).unwrap();
        let second = renderer.render(&record()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unset_fields_render_empty() {
        let renderer = Renderer::from_source("[{{ port }}]").unwrap();
        let record = ChangeRecord::with_host("a", "h", None);
        assert_eq!(renderer.render(&record).unwrap(), b"[]");
    }

    #[test]
    fn test_unknown_field_fails_at_render() {
        let renderer = Renderer::from_source("{{ upstream }}").unwrap();
        assert_eq!(
            renderer.render(&record()),
            Err(RenderError::UnknownField("upstream".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Template::parse("a {{ host"),
            Err(TemplateError::Unterminated { offset: 2 })
        ));
        assert!(matches!(
            Template::parse("{{  }}"),
            Err(TemplateError::EmptyPlaceholder { offset: 0 })
        ));
        assert!(matches!(
            Template::parse("x{{ host name }}"),
            Err(TemplateError::InvalidFieldName { offset: 1, .. })
        ));
    }

    #[test]
    fn test_single_braces_are_literal() {
        let template = Template::parse("location / { return 200; }").unwrap();
        assert_eq!(template.fields().count(), 0);
        assert_eq!(
            template.execute(&record()).unwrap(),
            b"location / { return 200; }"
        );
    }

    #[test]
    fn test_fields_lists_placeholders() {
        let template = Template::parse(NGINX).unwrap();
        assert_eq!(
            template.fields().collect::<Vec<_>>(),
            vec!["identifier", "host", "port"]
        );
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Renderer::from_file(dir.path().join("missing.tmpl")).unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
    }
}
