//! Message templates for notification text.
//!
//! Subjects and messages may reference entity fields with Jinja syntax
//! (`Expediente {{ numero }} asignado`). Plain strings pass through.

use std::collections::HashMap;

use minijinja::Environment;
use serde_json::Value;

use crate::error::EngineResult;

/// Renders notification text against an entity context.
pub struct MessageTemplate {
    env: Environment<'static>,
}

impl MessageTemplate {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("upper", |s: String| s.to_uppercase());
        env.add_filter("lower", |s: String| s.to_lowercase());
        Self { env }
    }

    /// Whether `s` contains template syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    pub fn render(&self, template: &str, context: &HashMap<String, Value>) -> EngineResult<String> {
        if !Self::is_template(template) {
            return Ok(template.to_string());
        }
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(minijinja::Value::from_serialize(context))?)
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTemplate").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> HashMap<String, Value> {
        let mut ctx = HashMap::new();
        ctx.insert("numero".to_string(), json!("E-12"));
        ctx.insert("solicitante".to_string(), json!({"nombre": "ana"}));
        ctx
    }

    #[test]
    fn test_plain_text_passes_through() {
        let template = MessageTemplate::new();
        assert_eq!(template.render("Sin variables", &ctx()).unwrap(), "Sin variables");
    }

    #[test]
    fn test_render_fields() {
        let template = MessageTemplate::new();
        let out = template
            .render("Expediente {{ numero }} de {{ solicitante.nombre | upper }}", &ctx())
            .unwrap();
        assert_eq!(out, "Expediente E-12 de ANA");
    }

    #[test]
    fn test_render_error() {
        let template = MessageTemplate::new();
        let err = template.render("{{ numero ", &ctx()).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Template(_)));
    }
}
