use crate::search::RetrievalParams;

/// Upper bound on context characters handed to the responder.
pub const MAX_CONTEXT_CHARS: usize = 200_000;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Placeholder in the sample prompt replaced with the variant count.
pub const COUNT_PLACEHOLDER: &str = "{count}";

pub const DEFAULT_SAMPLE_PROMPT: &str = "You are a data generation expert.
You will be given one or more sample questions.
For each of them, generate {count} other questions similar to it by changing the specific names and the question expression type.
Return the output as a JSON object with a key named 'questions' whose value is an array of the generated questions.
DON'T RESPOND WITH ANY EXTRA EXPLANATION.";

pub const DEFAULT_RESPOND_PROMPT: &str = "Answer the user's question accurately and correctly, with sufficient explanation, using only the content provided in the next message.";

/// Secret that never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Trims the key; blank keys become `None`.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let key = raw.as_ref().trim();
        (!key.is_empty()).then(|| Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Immutable settings for one generation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sampler_model: String,
    pub responder_model: String,
    /// System prompt for variant generation, `{count}` already substituted.
    pub sample_prompt: String,
    pub respond_prompt: String,
    pub retrieval: RetrievalParams,
    /// Seeds shown to the sampler per iteration; `None` shows all of them.
    pub sample_size: Option<usize>,
    /// Treat seeds as final questions and skip variant generation.
    pub passthrough: bool,
    pub iterations: usize,
    pub iteration_workers: usize,
    pub question_workers: usize,
    /// Copy the retrieved context into each output record.
    pub keep_context: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sampler_model: DEFAULT_MODEL.to_string(),
            responder_model: DEFAULT_MODEL.to_string(),
            sample_prompt: render_sample_prompt(DEFAULT_SAMPLE_PROMPT, 3),
            respond_prompt: DEFAULT_RESPOND_PROMPT.to_string(),
            retrieval: RetrievalParams {
                page_budget: 1,
                link_budget: 3,
                skip_domains: Vec::new(),
            },
            sample_size: None,
            passthrough: false,
            iterations: 1,
            iteration_workers: 1,
            question_workers: 4,
            keep_context: false,
        }
    }
}

pub fn render_sample_prompt(template: &str, count: usize) -> String {
    template.replace(COUNT_PLACEHOLDER, &count.to_string())
}
