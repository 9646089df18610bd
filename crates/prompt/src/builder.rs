//! Prompt builder for rendering answer templates.

use crate::types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition};
use handlebars::Handlebars;
use kbase_core::{AppError, AppResult};
use std::collections::HashMap;

/// Build the system and user messages for one grounded question.
///
/// An empty `context` selects the definition's `withoutContext` template.
/// `system_override` replaces the definition's system instruction verbatim.
///
/// # Example
/// ```
/// use kbase_prompt::{build_rag_prompt, PromptDefinition};
///
/// let def = PromptDefinition::default_rag();
/// let built = build_rag_prompt(&def, "What is Rust?", "", None).unwrap();
/// assert!(built.user.starts_with("问题：What is Rust?"));
/// ```
pub fn build_rag_prompt(
    definition: &PromptDefinition,
    question: &str,
    context: &str,
    system_override: Option<&str>,
) -> AppResult<BuiltPrompt> {
    tracing::debug!("Building prompt: {}", definition.id);

    let mut variables = HashMap::new();
    variables.insert("question", question);

    let context_included = !context.is_empty();
    let template = if context_included {
        variables.insert("context", context);
        &definition.with_context
    } else {
        &definition.without_context
    };

    let user = render_template(template, &variables)?;

    let system = match system_override {
        Some(system) => system.to_string(),
        None => definition.system.clone(),
    };

    Ok(BuiltPrompt {
        system,
        user,
        metadata: BuiltPromptMetadata {
            source_prompt_id: definition.id.clone(),
            context_included,
            system_overridden: system_override.is_some(),
        },
    })
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, variables: &HashMap<&str, &str>) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    let rendered = handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))?;

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_context_layout() {
        let def = PromptDefinition::default_rag();
        let built = build_rag_prompt(&def, "什么是RAG?", "[文档1] 来源: a.md\nRAG", None).unwrap();

        assert_eq!(
            built.user,
            "上下文信息：\n[文档1] 来源: a.md\nRAG\n\n问题：什么是RAG?"
        );
        assert!(built.metadata.context_included);
        assert_eq!(built.system, def.system);
    }

    #[test]
    fn test_without_context_notice() {
        let def = PromptDefinition::default_rag();
        let built = build_rag_prompt(&def, "q", "", None).unwrap();

        assert_eq!(
            built.user,
            "问题：q\n\n注意：没有找到相关的上下文信息，请告诉用户需要更多信息才能回答这个问题。"
        );
        assert!(!built.metadata.context_included);
    }

    #[test]
    fn test_system_override() {
        let def = PromptDefinition::default_rag();
        let built = build_rag_prompt(&def, "q", "ctx", Some("Be terse.")).unwrap();
        assert_eq!(built.system, "Be terse.");
        assert!(built.metadata.system_overridden);
    }

    #[test]
    fn test_no_html_escaping() {
        let mut vars = HashMap::new();
        vars.insert("question", "a < b && c > d");
        let rendered = render_template("{{question}}", &vars).unwrap();
        assert_eq!(rendered, "a < b && c > d");
    }

    #[test]
    fn test_invalid_template() {
        let vars = HashMap::new();
        assert!(render_template("{{#if}}", &vars).is_err());
    }
}
