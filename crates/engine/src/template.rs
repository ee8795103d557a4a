//! Body templating.

use minijinja::{Environment, UndefinedBehavior};
use resact_core::{EngineError, EngineResult};

/// Renders an action body against the event's template context.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, ctx: &serde_json::Value) -> EngineResult<Vec<u8>>;
}

/// Jinja-style renderer: `{{ name }}`, `{{ labels.app }}`, filters such as `tojson`.
/// Undefined variables are errors rather than silently empty.
pub struct JinjaRenderer {
    env: Environment<'static>,
}

impl Default for JinjaRenderer {
    fn default() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }
}

impl Renderer for JinjaRenderer {
    fn render(&self, template: &str, ctx: &serde_json::Value) -> EngineResult<Vec<u8>> {
        self.env
            .render_str(template, ctx)
            .map(String::into_bytes)
            .map_err(|e| EngineError::config(format!("render body template: {e}")))
    }
}
