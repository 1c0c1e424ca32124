//! Prompt construction and document batching.

use tracing::warn;

use docmodules_shared::NormalizedDocument;

const INSTRUCTIONS: &str = r#"You are reading product documentation. Identify the functional modules of the product it describes and the submodules within each module.

Respond with a single JSON object and nothing else. Use exactly this shape:

{
  "Module Name": {
    "Description": "One or two sentences on what the module does.",
    "Submodules": {
      "Submodule Name": "One sentence on what the submodule does."
    }
  }
}

Rules:
- Use only information present in the documentation below.
- Use two levels only: modules and their submodules.
- A module with no submodules has an empty "Submodules" object.
- If the documentation describes no modules, respond with {}.

"#;

/// A group of documents submitted to the model together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBatch {
    /// Source URLs, in input order.
    pub urls: Vec<String>,
    /// Concatenated document sections.
    pub body: String,
}

/// Pack documents into batches whose bodies stay within `char_budget`.
///
/// Documents keep their input order. A single document longer than the
/// budget is truncated into a batch of its own. A budget of `0` puts each
/// document in its own batch without truncation.
pub fn build_batches(docs: &[NormalizedDocument], char_budget: usize) -> Vec<PromptBatch> {
    let mut batches = Vec::new();
    let mut current: Option<PromptBatch> = None;

    for doc in docs {
        let mut section = render_section(doc);

        if char_budget == 0 {
            batches.push(PromptBatch {
                urls: vec![doc.url.clone()],
                body: section,
            });
            continue;
        }

        let len = section.chars().count();
        if len > char_budget {
            warn!(url = %doc.url, chars = len, budget = char_budget, "document exceeds prompt budget, truncating");
            section = truncate_chars(&section, char_budget);
        }

        let section_len = section.chars().count();
        let fits = current
            .as_ref()
            .is_some_and(|b| b.body.chars().count() + 2 + section_len <= char_budget);

        match current.as_mut() {
            Some(batch) if fits => {
                batch.body.push_str("\n\n");
                batch.body.push_str(&section);
                batch.urls.push(doc.url.clone());
            }
            _ => {
                batches.extend(current.replace(PromptBatch {
                    urls: vec![doc.url.clone()],
                    body: section,
                }));
            }
        }
    }

    batches.extend(current);
    batches
}

/// Full prompt text for one batch.
pub fn render_prompt(batch: &PromptBatch) -> String {
    let mut prompt = String::with_capacity(INSTRUCTIONS.len() + batch.body.len() + 32);
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("Documentation:\n\n");
    prompt.push_str(&batch.body);
    prompt.push('\n');
    prompt
}

fn render_section(doc: &NormalizedDocument) -> String {
    let title = doc
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&doc.url);
    format!(
        "Documentation Title: {title}\nURL: {}\n\n{}",
        doc.url,
        doc.clean_text.trim_end()
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
