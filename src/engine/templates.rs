//! Template rendering for target objects
//!
//! Templates are Jinja files whose output is a single YAML document. The
//! rendered document is parsed into a JSON value that callers deserialize
//! into the concrete target type.

use crate::error::{Error, Result};
use base64::Engine as _;
use minijinja::{AutoEscape, Environment};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Renders a named template against a data context
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &serde_json::Value) -> Result<serde_json::Value>;
}

pub type TemplateRendererRef = Arc<dyn TemplateRenderer>;

/// Jinja template collection
pub struct TemplateSet {
    env: Environment<'static>,
}

impl TemplateSet {
    /// Empty set with the operator's filters registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        // Output is YAML, never HTML
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("b64encode", b64encode);
        env.add_filter("quote", quote);
        Self { env }
    }

    /// Load every file under `dir`. Names are paths relative to `dir`
    /// with `/` separators, so `helpers/labels.j2` can be imported from
    /// any other template.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let pattern = format!("{}/**/*", dir.display());
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::Configuration(format!("bad template pattern {}: {}", pattern, e)))?;

        let mut set = Self::new();
        for entry in paths {
            let path = entry.map_err(|e| Error::Io(e.into()))?;
            if !path.is_file() {
                continue;
            }
            let name = path
                .strip_prefix(dir)
                .map_err(|e| Error::Internal(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let source = std::fs::read_to_string(&path)?;
            debug!("Loaded template {}", name);
            set.add_template(name, source)?;
        }
        Ok(set)
    }

    /// Add a template from source
    pub fn add_template(&mut self, name: impl Into<String>, source: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.env
            .add_template_owned(name.clone(), source.into())
            .map_err(|e| Error::Template {
                template: name,
                reason: e.to_string(),
            })
    }

    /// Names of all loaded templates
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.templates().map(|(name, _)| name.to_string()).collect();
        names.sort();
        names
    }

    /// Render to text without parsing
    pub fn render_text(&self, template: &str, data: &serde_json::Value) -> Result<String> {
        let tmpl = self.env.get_template(template).map_err(|e| Error::Template {
            template: template.to_string(),
            reason: e.to_string(),
        })?;
        tmpl.render(data).map_err(|e| Error::Template {
            template: template.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for TemplateSet {
    fn render(&self, template: &str, data: &serde_json::Value) -> Result<serde_json::Value> {
        let text = self.render_text(template, data)?;
        serde_yaml::from_str(&text).map_err(|e| Error::Template {
            template: template.to_string(),
            reason: format!("rendered output is not valid YAML: {}", e),
        })
    }
}

fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

/// Double-quoted scalar, safe for any string value
fn quote(value: String) -> String {
    serde_json::Value::String(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;

    #[test]
    fn test_render_yaml_document() {
        let mut set = TemplateSet::new();
        set.add_template(
            "secret.yml.j2",
            "kind: Secret\ndata:\n  password: {{ extra.password | b64encode }}\n",
        )
        .unwrap();

        let value = set
            .render("secret.yml.j2", &serde_json::json!({"extra": {"password": "hunter2"}}))
            .unwrap();
        assert_eq!(value["kind"], "Secret");
        assert_eq!(value["data"]["password"], "aHVudGVyMg==");
    }

    #[test]
    fn test_load_directory_with_helpers() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("helpers")).unwrap();
        fs::write(
            dir.path().join("helpers/labels.j2"),
            "{% macro labels(name) %}app: {{ name }}{% endmacro %}",
        )
        .unwrap();
        fs::write(
            dir.path().join("service.yml.j2"),
            "{% import \"helpers/labels.j2\" as h %}\nkind: Service\nmetadata:\n  labels:\n    {{ h.labels(extra.name) }}\n",
        )
        .unwrap();

        let set = TemplateSet::from_dir(dir.path()).unwrap();
        assert_eq!(set.names(), vec!["helpers/labels.j2", "service.yml.j2"]);

        let value = set
            .render("service.yml.j2", &serde_json::json!({"extra": {"name": "web"}}))
            .unwrap();
        assert_eq!(value["metadata"]["labels"]["app"], "web");
    }

    #[test]
    fn test_quote_filter_keeps_yaml_valid() {
        let mut set = TemplateSet::new();
        set.add_template("cm.yml.j2", "data:\n  motd: {{ extra.motd | quote }}\n")
            .unwrap();

        let value = set
            .render("cm.yml.j2", &serde_json::json!({"extra": {"motd": "key: \"value\" # not a comment"}}))
            .unwrap();
        assert_eq!(value["data"]["motd"], "key: \"value\" # not a comment");
    }

    #[test]
    fn test_unknown_template() {
        let set = TemplateSet::new();
        let err = set.render("missing.yml.j2", &serde_json::Value::Null).unwrap_err();
        assert_matches!(err, Error::Template { .. });
    }

    #[test]
    fn test_invalid_yaml_output() {
        let mut set = TemplateSet::new();
        set.add_template("broken.yml.j2", "kind: [unclosed\n").unwrap();
        let err = set.render("broken.yml.j2", &serde_json::Value::Null).unwrap_err();
        assert_matches!(err, Error::Template { .. });
        assert!(err.to_string().contains("not valid YAML"));
    }
}
