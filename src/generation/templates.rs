use crate::generation::RetrievalBundle;
use crate::types::Rung;

pub const REFLECTIVE_SECTIONS: [&str; 4] = ["Summary", "Common Mistakes", "Minimal Example", "Key Takeaway"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub rung: Rung,
    pub max_chars: usize,
    pub requires_concepts: bool,
    pub requires_sources: bool,
    pub required_sections: &'static [&'static str],
    pub template: &'static str,
}

const MICRO_HINT: PromptTemplate = PromptTemplate {
    rung: Rung::MicroHint,
    max_chars: 150,
    requires_concepts: true,
    requires_sources: false,
    required_sections: &[],
    template: "You are a SQL tutor giving a single short nudge.\n\
Problem: {{problemTitle}}\n\
Schema:\n{{schemaText}}\n\
Latest error subtype: {{lastErrorSubtypeId}}\n\
Hints already shown:\n{{hintHistory}}\n\
Candidate concepts:\n{{conceptCandidates}}\n\n\
Write one hint of at most 150 characters. Do not reveal the answer.\n\
End with a line `conceptIds: [id, ...]` using only candidate concept ids.",
};

const EXPLANATION: PromptTemplate = PromptTemplate {
    rung: Rung::Explanation,
    max_chars: 800,
    requires_concepts: true,
    requires_sources: true,
    required_sections: &[],
    template: "You are a SQL tutor explaining why the learner's query fails.\n\
Problem: {{problemTitle}}\n\
Schema:\n{{schemaText}}\n\
Latest error subtype: {{lastErrorSubtypeId}}\n\
Hints already shown:\n{{hintHistory}}\n\
Candidate concepts:\n{{conceptCandidates}}\n\
Retrieved sources ({{whyRetrieved}}):\n{{sourcePassages}}\n\n\
Write an explanation of at most 800 characters that only uses the sources above.\n\
End with two lines:\n\
`conceptIds: [id, ...]` using only candidate concept ids\n\
`sourceRefIds: [id, ...]` citing at least one retrieved source id.",
};

const REFLECTIVE_NOTE: PromptTemplate = PromptTemplate {
    rung: Rung::ReflectiveNote,
    max_chars: 2500,
    requires_concepts: true,
    requires_sources: true,
    required_sections: &REFLECTIVE_SECTIONS,
    template: "You are a SQL tutor writing a reflective study note the learner will keep.\n\
Problem: {{problemTitle}}\n\
Schema:\n{{schemaText}}\n\
Latest error subtype: {{lastErrorSubtypeId}}\n\
Hints already shown:\n{{hintHistory}}\n\
Candidate concepts:\n{{conceptCandidates}}\n\
Concept sources:\n{{conceptSourceRefs}}\n\
Retrieved sources ({{whyRetrieved}}):\n{{sourcePassages}}\n\n\
Write at most 2500 characters with the sections `## Summary`, `## Common Mistakes`,\n\
`## Minimal Example` and `## Key Takeaway`, using only the sources above.\n\
End with two lines:\n\
`conceptIds: [id, ...]` using only candidate concept ids\n\
`sourceRefIds: [id, ...]` citing the retrieved source ids you used.",
};

pub fn template_for(rung: Rung) -> &'static PromptTemplate {
    match rung {
        Rung::MicroHint => &MICRO_HINT,
        Rung::Explanation => &EXPLANATION,
        Rung::ReflectiveNote => &REFLECTIVE_NOTE,
    }
}

fn bullet_list(items: impl IntoIterator<Item = String>) -> String {
    let lines: Vec<String> = items.into_iter().map(|s| format!("- {s}")).collect();
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn build_prompt(rung: Rung, bundle: &RetrievalBundle) -> String {
    let concepts = bullet_list(
        bundle
            .concept_candidates
            .iter()
            .map(|c| format!("{} ({})", c.id, c.name)),
    );
    let sources = bullet_list(
        bundle
            .source_passages
            .iter()
            .chain(bundle.pdf_passages.iter())
            .map(|p| format!("[{}] {}", p.id, p.text)),
    );
    let concept_refs = bullet_list(
        bundle
            .concept_source_refs
            .iter()
            .map(|(concept, refs)| format!("{concept}: {}", refs.join(", "))),
    );

    template_for(rung)
        .template
        .replace("{{problemTitle}}", &bundle.problem_title)
        .replace("{{schemaText}}", &bundle.schema_text)
        .replace(
            "{{lastErrorSubtypeId}}",
            bundle.last_error_subtype_id.as_deref().unwrap_or("none"),
        )
        .replace("{{hintHistory}}", &bullet_list(bundle.hint_history.iter().cloned()))
        .replace("{{conceptCandidates}}", &concepts)
        .replace("{{conceptSourceRefs}}", &concept_refs)
        .replace("{{whyRetrieved}}", &bundle.why_retrieved)
        .replace("{{sourcePassages}}", &sources)
}
