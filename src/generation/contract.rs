use std::fmt;
use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::generation::templates::{build_prompt, template_for};
use crate::generation::{LlmGuidanceOutput, LlmOutputMetadata, RetrievalBundle};
use crate::types::Rung;

static CONCEPT_IDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*`?conceptIds[ \t]*:[ \t]*\[([^\]\n]*)\]`?[ \t]*$").expect("hardcoded regex")
});
static SOURCE_REF_IDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*`?sourceRefIds[ \t]*:[ \t]*\[([^\]\n]*)\]`?[ \t]*$").expect("hardcoded regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub content: String,
    pub concept_ids: Vec<String>,
    pub source_ref_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub metadata: LlmOutputMetadata,
}

fn split_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn last_list(pattern: &Regex, raw: &str) -> Vec<String> {
    pattern
        .captures_iter(raw)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| split_id_list(m.as_str()))
        .unwrap_or_default()
}

/// Pulls the trailing `conceptIds: [...]` and `sourceRefIds: [...]` lines
/// out of a completion and returns the remaining body.
pub fn parse_llm_output(raw: &str) -> ParsedOutput {
    let concept_ids = last_list(&CONCEPT_IDS, raw);
    let source_ref_ids = last_list(&SOURCE_REF_IDS, raw);

    let without_concepts = CONCEPT_IDS.replace_all(raw, "");
    let body = SOURCE_REF_IDS.replace_all(&without_concepts, "");

    ParsedOutput {
        content: body.trim().to_string(),
        concept_ids,
        source_ref_ids,
    }
}

/// Checks grounding, length and required sections for `rung`.
///
/// A micro-hint is grounded when it names at least one concept and every
/// named concept is a retrieval candidate. Explanations and reflective notes
/// additionally need at least one cited source, all of them retrieved. An
/// unknown concept ID clears `grounded` at every rung, including rung 1.
pub fn validate_llm_output(output: &ParsedOutput, rung: Rung, bundle: &RetrievalBundle) -> ValidationResult {
    let template = template_for(rung);
    let mut errors = Vec::new();

    if template.requires_concepts && output.concept_ids.is_empty() {
        errors.push(format!("{rung} output must include conceptIds"));
    }
    if template.requires_sources && output.source_ref_ids.is_empty() {
        errors.push(format!("{rung} output must cite at least one sourceRefId"));
    }

    let lowered = output.content.to_lowercase();
    for section in template.required_sections {
        if !lowered.contains(&section.to_lowercase()) {
            errors.push(format!("missing required section: {section}"));
        }
    }

    let content_length = output.content.chars().count();
    if content_length > template.max_chars {
        errors.push(format!(
            "content length {content_length} exceeds {} characters",
            template.max_chars
        ));
    }

    let ungrounded_concepts: Vec<String> = output
        .concept_ids
        .iter()
        .filter(|id| !bundle.has_concept(id))
        .cloned()
        .collect();
    for id in &ungrounded_concepts {
        errors.push(format!("ungrounded concept: {id}"));
    }

    let ungrounded_sources: Vec<String> = output
        .source_ref_ids
        .iter()
        .filter(|id| !bundle.has_source(id))
        .cloned()
        .collect();
    for id in &ungrounded_sources {
        errors.push(format!("ungrounded source: {id}"));
    }

    let grounded = match rung {
        Rung::MicroHint => !output.concept_ids.is_empty(),
        Rung::Explanation | Rung::ReflectiveNote => {
            !output.source_ref_ids.is_empty() && ungrounded_sources.is_empty()
        }
    } && ungrounded_concepts.is_empty();

    let metadata = LlmOutputMetadata {
        rung,
        concept_ids: output.concept_ids.clone(),
        source_ref_ids: output.source_ref_ids.clone(),
        grounded,
        ungrounded_concepts,
        ungrounded_sources,
        content_length,
        validation_errors: errors.clone(),
        fallback_used: false,
        fallback_reason: None,
        generated_at: chrono::Utc::now().timestamp_millis(),
    };

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        metadata,
    }
}

/// Produces guidance for `rung`, calling the text generator at most once.
///
/// Rungs 2 and 3 fall back to canned content when the bundle has no sources
/// (the generator is not called), when validation fails, or when the call
/// errors. Rung 1 keeps imperfectly grounded output and only falls back on
/// a call error.
pub async fn generate_guidance<F, Fut, E>(rung: Rung, bundle: &RetrievalBundle, llm_call: F) -> LlmGuidanceOutput
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: fmt::Display,
{
    let subtype = bundle.last_error_subtype_id.as_deref();

    if rung != Rung::MicroHint && !bundle.has_sources() {
        warn!(rung = rung.as_u8(), "no retrieved sources, using fallback guidance");
        let mut fallback = generate_fallback_content(rung, subtype);
        fallback.metadata.fallback_reason = Some("no retrieved sources available".to_string());
        return fallback;
    }

    let prompt = build_prompt(rung, bundle);
    let raw = match llm_call(prompt).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(rung = rung.as_u8(), error = %err, "guidance generation failed, using fallback");
            let mut fallback = generate_fallback_content(rung, subtype);
            fallback.metadata.fallback_reason = Some(err.to_string());
            return fallback;
        }
    };

    let parsed = parse_llm_output(&raw);
    let validation = validate_llm_output(&parsed, rung, bundle);

    if rung != Rung::MicroHint && !validation.valid {
        warn!(
            rung = rung.as_u8(),
            errors = validation.errors.len(),
            "generated guidance failed validation, using fallback"
        );
        let mut fallback = generate_fallback_content(rung, subtype);
        fallback.metadata = LlmOutputMetadata {
            grounded: false,
            fallback_used: true,
            fallback_reason: Some(format!("validation failed: {}", validation.errors.join("; "))),
            content_length: fallback.content.chars().count(),
            ..validation.metadata
        };
        return fallback;
    }

    debug!(
        rung = rung.as_u8(),
        grounded = validation.metadata.grounded,
        concepts = validation.metadata.concept_ids.len(),
        "guidance generated"
    );
    LlmGuidanceOutput {
        content: parsed.content,
        metadata: validation.metadata,
    }
}

pub fn generate_fallback_content(rung: Rung, error_subtype: Option<&str>) -> LlmGuidanceOutput {
    let content = match rung {
        Rung::MicroHint => {
            "Re-read the error message and check the clause it points to.".to_string()
        }
        Rung::Explanation => "Your query has a problem the checker could not pin to a specific \
            source. Compare each clause with the schema: confirm table and column names, check \
            that every joined table has a join condition, and make sure aggregated columns are \
            grouped."
            .to_string(),
        Rung::ReflectiveNote => "## Summary\nThis problem needed several attempts before the query \
            ran correctly.\n\n## Common Mistakes\n- Referencing columns that are not in the schema\n\
            - Missing join conditions\n- Mixing aggregated and non-aggregated columns without GROUP BY\n\n\
            ## Minimal Example\n```sql\nSELECT c.name, COUNT(o.id)\nFROM customers c\n\
            JOIN orders o ON o.customer_id = c.id\nGROUP BY c.name;\n```\n\n\
            ## Key Takeaway\nBuild the query one clause at a time and run it after each step."
            .to_string(),
    };

    let concept_ids = match error_subtype {
        Some(_) => vec!["syntax-error".to_string()],
        None => Vec::new(),
    };

    LlmGuidanceOutput {
        metadata: LlmOutputMetadata {
            rung,
            concept_ids,
            source_ref_ids: Vec::new(),
            grounded: false,
            ungrounded_concepts: Vec::new(),
            ungrounded_sources: Vec::new(),
            content_length: content.chars().count(),
            validation_errors: Vec::new(),
            fallback_used: true,
            fallback_reason: None,
            generated_at: chrono::Utc::now().timestamp_millis(),
        },
        content,
    }
}
