//! Prompt loader for YAML prompt definitions.

use crate::types::{PromptDefinition, DEFAULT_RAG_PROMPT_ID};
use kbase_core::{AppError, AppResult};
use std::path::Path;

/// Load a prompt definition by ID from the workspace.
///
/// Looks for `<id>.yml` in `.kbase/prompts/`. The built-in
/// `rag.answer.default` prompt is used when the workspace has no file for it.
///
/// # Example
/// ```no_run
/// use kbase_prompt::load_prompt;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), "rag.answer.default")?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = workspace_path
        .join(".kbase/prompts")
        .join(format!("{}.yml", prompt_id));

    tracing::debug!("Loading prompt from: {:?}", prompt_file);

    if !prompt_file.exists() {
        if prompt_id == DEFAULT_RAG_PROMPT_ID {
            return Ok(PromptDefinition::default_rag());
        }
        return Err(AppError::Prompt(format!(
            "Prompt file not found: {:?}",
            prompt_file
        )));
    }

    let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to read prompt file {:?}: {}",
            prompt_file, e
        ))
    })?;

    let definition: PromptDefinition = serde_yaml::from_str(&contents).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to parse prompt YAML {:?}: {}",
            prompt_file, e
        ))
    })?;

    validate_prompt(&definition)?;

    tracing::info!("Loaded prompt: {} ({})", definition.id, definition.title);

    Ok(definition)
}

/// Validate a prompt definition.
fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    if !def.with_context.contains("{{context}}") {
        return Err(AppError::Prompt(
            "Prompt withContext template must reference {{context}}".to_string(),
        ));
    }

    if !def.with_context.contains("{{question}}") || !def.without_context.contains("{{question}}")
    {
        return Err(AppError::Prompt(
            "Prompt templates must reference {{question}}".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_prompt(dir: &Path, id: &str, body: &str) -> PathBuf {
        let prompts_dir = dir.join(".kbase/prompts");
        fs::create_dir_all(&prompts_dir).unwrap();
        let file_path = prompts_dir.join(format!("{}.yml", id));
        fs::write(&file_path, body).unwrap();
        file_path
    }

    fn valid_prompt(id: &str) -> String {
        format!(
            r#"
id: {}
title: "Test Prompt"
apiVersion: "1.0"
system: "Answer from context."
withContext: "{{{{context}}}}\n{{{{question}}}}"
withoutContext: "No context. {{{{question}}}}"
"#,
            id
        )
    }

    #[test]
    fn test_load_valid_prompt() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "test.prompt", &valid_prompt("test.prompt"));

        let prompt = load_prompt(temp_dir.path(), "test.prompt").unwrap();
        assert_eq!(prompt.id, "test.prompt");
        assert_eq!(prompt.system, "Answer from context.");
    }

    #[test]
    fn test_builtin_default_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let prompt = load_prompt(temp_dir.path(), DEFAULT_RAG_PROMPT_ID).unwrap();
        assert_eq!(prompt.id, DEFAULT_RAG_PROMPT_ID);
    }

    #[test]
    fn test_workspace_overrides_builtin() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(
            temp_dir.path(),
            DEFAULT_RAG_PROMPT_ID,
            &valid_prompt(DEFAULT_RAG_PROMPT_ID),
        );

        let prompt = load_prompt(temp_dir.path(), DEFAULT_RAG_PROMPT_ID).unwrap();
        assert_eq!(prompt.system, "Answer from context.");
    }

    #[test]
    fn test_load_nonexistent_prompt() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_prompt(temp_dir.path(), "nonexistent").is_err());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        write_prompt(temp_dir.path(), "invalid", "invalid: yaml: content:");
        assert!(load_prompt(temp_dir.path(), "invalid").is_err());
    }

    #[test]
    fn test_template_without_question_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let body = valid_prompt("broken").replace("No context. {{question}}", "No context.");
        write_prompt(temp_dir.path(), "broken", &body);
        assert!(load_prompt(temp_dir.path(), "broken").is_err());
    }
}
