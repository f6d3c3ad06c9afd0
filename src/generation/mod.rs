pub mod contract;
pub mod templates;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Rung;

pub use contract::{
    generate_fallback_content, generate_guidance, parse_llm_output, validate_llm_output,
    ParsedOutput, ValidationResult,
};
pub use templates::{build_prompt, template_for, PromptTemplate};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptCandidate {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePassage {
    pub id: String,
    pub text: String,
}

/// Grounding material supplied by the external retrieval pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalBundle {
    pub concept_candidates: Vec<ConceptCandidate>,
    pub source_passages: Vec<SourcePassage>,
    pub pdf_passages: Vec<SourcePassage>,
    pub retrieved_source_ids: Vec<String>,
    pub hint_history: Vec<String>,
    pub why_retrieved: String,
    pub concept_source_refs: BTreeMap<String, Vec<String>>,
    pub last_error_subtype_id: Option<String>,
    pub problem_title: String,
    pub schema_text: String,
}

impl RetrievalBundle {
    pub fn has_sources(&self) -> bool {
        !self.source_passages.is_empty()
            || !self.pdf_passages.is_empty()
            || !self.retrieved_source_ids.is_empty()
    }

    pub fn has_concept(&self, id: &str) -> bool {
        self.concept_candidates.iter().any(|c| c.id == id)
    }

    pub fn has_source(&self, id: &str) -> bool {
        self.retrieved_source_ids.iter().any(|s| s == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmOutputMetadata {
    pub rung: Rung,
    pub concept_ids: Vec<String>,
    pub source_ref_ids: Vec<String>,
    pub grounded: bool,
    pub ungrounded_concepts: Vec<String>,
    pub ungrounded_sources: Vec<String>,
    pub content_length: usize,
    pub validation_errors: Vec<String>,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmGuidanceOutput {
    pub content: String,
    pub metadata: LlmOutputMetadata,
}
