//! Prompt template for simulated CT classifications.
//!
//! One template is shared by every provider so their outputs stay comparable.
//! The only parameter is the free-text history.

use crate::gateway::Message;
use crate::images::ImagePayload;

/// Placeholder rendered when a subject has no usable history.
pub const NO_HISTORY_PLACEHOLDER: &str = "No history provided.";

/// Diagnostic categories offered to the model, in prompt order.
pub const CATEGORIES: [&str; 5] = [
    "Traumatische SAB",
    "typische/atypische ICB",
    "Kontusionsblutung",
    "Aneurysmatische SAB",
    "Andere Blutungen (Epidural-/Subduralblutung)",
];

// =============================================================================
// Prompt templates
// =============================================================================

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub user: String,
}

impl PromptInstance {
    /// Single user turn: prompt text followed by every image.
    pub fn to_message(&self, images: &[ImagePayload]) -> Message {
        Message::user_with_images(&self.user, images)
    }
}

/// A prompt template with `{categories}` and `{history}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, history: Option<&str>) -> PromptInstance {
        let history = history
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(NO_HISTORY_PLACEHOLDER);

        let categories = CATEGORIES
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} - {c}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let user = self
            .user
            .replace("{categories}", &categories)
            .replace("{history}", history);

        PromptInstance {
            template_slug: self.slug,
            user,
        }
    }
}

// =============================================================================
// Standard prompt
// =============================================================================

pub const CLASSIFICATION_PROMPT: PromptTemplate = PromptTemplate {
    slug: "ct_classification_v1",
    user: "You are simulating a radiology assistant in a research scenario. \
Below is a fictional case study involving CT images. \
Please provide two **hypothetical classifications** using the following categories \
(one classification can belong to multiple categories):

{categories}

For each hypothetical classification, include:
- The chosen category or categories
- A brief reasoning (1–2 sentences)
- Your confidence level using a Likert scale (1–5)

Important: This is not for medical use and does not represent real patient data. \
It is purely for academic analysis of language model behavior in radiological contexts.

1. Hypothetical classification **without medical history**.
2. Hypothetical classification **with medical history**: {history}",
};

/// Render the shared classification prompt.
pub fn classification_prompt(history: Option<&str>) -> PromptInstance {
    CLASSIFICATION_PROMPT.render(history)
}

// =============================================================================
// TESTS
// =============================================================================
