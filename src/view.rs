//! View rendering contract.
//!
//! The dispatcher never renders templates itself; handlers call a
//! [`ViewRenderer`] and wrap the output with [`crate::Response::view`].

use anyhow::{Context, Result};
use minijinja::Environment;
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub trait ViewRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &Value) -> Result<String>;
}

/// Resolve `template` under `root`, refusing anything that climbs out.
fn template_path(root: &Path, template: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for comp in Path::new(template).components() {
        match comp {
            Component::Normal(s) => path.push(s),
            Component::CurDir => {}
            _ => anyhow::bail!("template path '{template}' escapes the view root"),
        }
    }
    Ok(path)
}

/// Plain `{{name}}` substitution, no logic.
pub struct RawView {
    root: PathBuf,
}

impl RawView {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Substitute top-level keys of `vars` into `source`. Unknown
    /// placeholders are left as-is.
    pub fn substitute(source: &str, vars: &Value) -> String {
        let mut out = source.to_string();
        if let Value::Object(map) = vars {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                for placeholder in [format!("{{{{{key}}}}}"), format!("{{{{ {key} }}}}")] {
                    out = out.replace(&placeholder, &rendered);
                }
            }
        }
        out
    }
}

impl ViewRenderer for RawView {
    fn render(&self, template: &str, vars: &Value) -> Result<String> {
        let path = template_path(&self.root, template)?;
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read view {}", path.display()))?;
        Ok(Self::substitute(&source, vars))
    }
}

/// Templates rendered by `minijinja`, loaded from a directory.
pub struct MiniJinjaView {
    root: PathBuf,
}

impl MiniJinjaView {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ViewRenderer for MiniJinjaView {
    fn render(&self, template: &str, vars: &Value) -> Result<String> {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(&self.root));
        let tmpl = env
            .get_template(template)
            .with_context(|| format!("failed to load template {template}"))?;
        tmpl.render(vars)
            .with_context(|| format!("failed to render template {template}"))
    }
}
