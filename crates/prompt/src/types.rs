//! Prompt types.

use serde::{Deserialize, Serialize};

/// Identifier of the built-in answer prompt.
pub const DEFAULT_RAG_PROMPT_ID: &str = "rag.answer.default";

const DEFAULT_SYSTEM: &str = "你是一个专业的知识库助手，请根据提供的上下文信息回答用户的问题。
请遵循以下规则：
1. 仅基于提供的上下文信息回答问题
2. 如果上下文中没有相关信息，请明确说明
3. 回答要准确、详细且有条理
4. 在回答中引用具体的文档来源
5. 如果需要澄清问题，请主动询问";

const DEFAULT_WITH_CONTEXT: &str = "上下文信息：\n{{context}}\n\n问题：{{question}}";

const DEFAULT_WITHOUT_CONTEXT: &str =
    "问题：{{question}}\n\n注意：没有找到相关的上下文信息，请告诉用户需要更多信息才能回答这个问题。";

/// A prompt definition loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Unique prompt identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// API version for schema evolution
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Creator identifier
    #[serde(rename = "createdBy", default)]
    pub created_by: String,

    /// System instruction sent ahead of every question
    pub system: String,

    /// User message template when context was retrieved (`{{context}}`, `{{question}}`)
    #[serde(rename = "withContext")]
    pub with_context: String,

    /// User message template when nothing was retrieved (`{{question}}`)
    #[serde(rename = "withoutContext")]
    pub without_context: String,
}

impl PromptDefinition {
    /// The grounding prompt used when the workspace does not override it.
    pub fn default_rag() -> Self {
        Self {
            id: DEFAULT_RAG_PROMPT_ID.to_string(),
            title: "Grounded knowledge base answer".to_string(),
            api_version: "1.0".to_string(),
            created_by: "kbase".to_string(),
            system: DEFAULT_SYSTEM.to_string(),
            with_context: DEFAULT_WITH_CONTEXT.to_string(),
            without_context: DEFAULT_WITHOUT_CONTEXT.to_string(),
        }
    }
}

/// A fully built prompt ready for LLM execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltPrompt {
    /// System message
    pub system: String,

    /// User message
    pub user: String,

    /// Metadata about the built prompt
    pub metadata: BuiltPromptMetadata,
}

/// Metadata about a built prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltPromptMetadata {
    /// Source prompt ID
    #[serde(rename = "sourcePromptId")]
    pub source_prompt_id: String,

    /// Whether retrieved context was rendered into the user message
    #[serde(rename = "contextIncluded")]
    pub context_included: bool,

    /// Whether the caller replaced the system instruction
    #[serde(rename = "systemOverridden")]
    pub system_overridden: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_definition_deserialization() {
        let yaml = r#"
id: test.prompt
title: Test Prompt
apiVersion: "1.0"
createdBy: test
system: "Answer briefly."
withContext: "Context:\n{{context}}\n\nQ: {{question}}"
withoutContext: "Q: {{question}}"
"#;

        let def: PromptDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "test.prompt");
        assert_eq!(def.system, "Answer briefly.");
        assert!(def.with_context.contains("{{context}}"));
    }

    #[test]
    fn test_default_rag_prompt() {
        let def = PromptDefinition::default_rag();
        assert_eq!(def.id, DEFAULT_RAG_PROMPT_ID);
        assert!(def.system.contains("仅基于提供的上下文信息回答问题"));
        assert!(def.without_context.contains("没有找到相关的上下文信息"));
    }
}
