//! Second-pass template rendering.

use minijinja::Environment;
use serde::Serialize;

use super::BuildError;

/// Thin wrapper over a minijinja environment with the string helpers
/// available both as filters and as functions.
#[derive(Debug)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// An engine with the `upper`, `lower` and `replace` helpers registered.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_function("upper", |s: String| s.to_uppercase());
        env.add_function("lower", |s: String| s.to_lowercase());
        env.add_function("replace", |s: String, from: String, to: String| {
            s.replace(&from, &to)
        });
        Self { env }
    }

    /// Render `source`. Text without template markers is returned untouched.
    pub fn render<S: Serialize>(&self, source: &str, data: &S) -> Result<String, BuildError> {
        if !has_markers(source) {
            return Ok(source.to_string());
        }
        Ok(self.env.render_str(source, data)?)
    }
}

fn has_markers(source: &str) -> bool {
    source.contains("{{") || source.contains("{%")
}
