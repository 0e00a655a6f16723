use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::{ChatClient, ChatMessage, LlmError};

/// Seed questions as handed to the sampler: one question or a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedInput {
    One(String),
    Many(Vec<String>),
}

impl SeedInput {
    pub fn into_list(self) -> Vec<String> {
        match self {
            SeedInput::One(q) => vec![q],
            SeedInput::Many(qs) => qs,
        }
    }
}

impl From<&str> for SeedInput {
    fn from(q: &str) -> Self {
        SeedInput::One(q.to_string())
    }
}

impl From<String> for SeedInput {
    fn from(q: String) -> Self {
        SeedInput::One(q)
    }
}

impl From<Vec<String>> for SeedInput {
    fn from(qs: Vec<String>) -> Self {
        SeedInput::Many(qs)
    }
}

impl From<&[String]> for SeedInput {
    fn from(qs: &[String]) -> Self {
        SeedInput::Many(qs.to_vec())
    }
}

/// Question variants produced for one sampling call. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSet {
    pub questions: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("no seed questions to sample from")]
    NoSeeds,

    #[error("variant generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("model reply contains no JSON object")]
    NoJson,

    #[error("model reply JSON is invalid: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("model reply contains no questions")]
    Empty,
}

#[derive(Deserialize)]
struct VariantReply {
    #[serde(alias = "question")]
    questions: OneOrMany,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Produces question variants from seeds, either by asking the model to
/// paraphrase them or by passing them through.
pub struct Sampler<'a, C> {
    client: &'a C,
    model: &'a str,
}

impl<'a, C: ChatClient> Sampler<'a, C> {
    pub fn new(client: &'a C, model: &'a str) -> Self {
        Self { client, model }
    }

    /// `sample_size` limits which seeds the model sees, not how many variants
    /// come back. A single attempt is made; parse failures are returned.
    pub async fn generate(
        &self,
        seed: impl Into<SeedInput>,
        rewrite_prompt: &str,
        sample_size: Option<usize>,
        passthrough: bool,
    ) -> Result<SampleSet, SampleError> {
        let mut seeds = seed.into().into_list();
        if let Some(size) = sample_size {
            seeds = subsample(seeds, size, &mut fastrand::Rng::new());
        }
        if seeds.is_empty() {
            return Err(SampleError::NoSeeds);
        }

        if passthrough {
            return Ok(SampleSet { questions: seeds });
        }

        let block = numbered_block(&seeds);
        debug!(seeds = seeds.len(), "requesting question variants");
        let messages = [ChatMessage::system(rewrite_prompt), ChatMessage::user(block)];
        let reply = self.client.complete(&messages, self.model, None).await?;

        let questions = parse_variants(&reply).inspect_err(|e| {
            warn!(error = %e, reply = %reply, "could not parse variants");
        })?;
        debug!(variants = questions.len(), "variants generated");
        Ok(SampleSet { questions })
    }
}

/// Uniform random subset without replacement, kept in seed order.
/// Returns all seeds when `size` is not smaller than the list.
pub(crate) fn subsample(seeds: Vec<String>, size: usize, rng: &mut fastrand::Rng) -> Vec<String> {
    if size >= seeds.len() {
        return seeds;
    }
    let mut picked: Vec<usize> = (0..seeds.len()).collect();
    rng.shuffle(&mut picked);
    picked.truncate(size);
    picked.sort_unstable();

    let mut keep = vec![false; seeds.len()];
    for i in picked {
        keep[i] = true;
    }
    seeds
        .into_iter()
        .zip(keep)
        .filter_map(|(q, k)| k.then_some(q))
        .collect()
}

fn numbered_block(seeds: &[String]) -> String {
    seeds
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{} - {q}\n", i + 1))
        .collect()
}

/// Decodes the span from the first `{` to the last `}` of the reply.
fn parse_variants(reply: &str) -> Result<Vec<String>, SampleError> {
    let start = reply.find('{').ok_or(SampleError::NoJson)?;
    let end = reply.rfind('}').ok_or(SampleError::NoJson)?;
    if end < start {
        return Err(SampleError::NoJson);
    }

    let parsed: VariantReply = serde_json::from_str(&reply[start..=end])?;
    let questions: Vec<String> = match parsed.questions {
        OneOrMany::One(q) => vec![q],
        OneOrMany::Many(qs) => qs,
    }
    .into_iter()
    .map(|q| q.trim().to_string())
    .filter(|q| !q.is_empty())
    .collect();

    if questions.is_empty() {
        return Err(SampleError::Empty);
    }
    Ok(questions)
}
