//! Iterations x questions fan-out: sample variants, retrieve context, answer.
//! Each unit of work fails on its own; the run itself always completes.

pub mod context;
pub mod responder;
pub mod sampler;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::llm::{ChatClient, LlmError};
use crate::search::SearchBackend;

pub use context::ContextBuilder;
pub use responder::{Record, Responder};
pub use sampler::Sampler;

#[derive(Debug, Default)]
struct IterationOutcome {
    records: Vec<Record>,
    failed_questions: usize,
    dropped: bool,
}

pub struct Pipeline<'a, C, B> {
    client: &'a C,
    backend: &'a B,
    config: &'a RunConfig,
}

impl<'a, C: ChatClient, B: SearchBackend> Pipeline<'a, C, B> {
    pub fn new(client: &'a C, backend: &'a B, config: &'a RunConfig) -> Self {
        Self {
            client,
            backend,
            config,
        }
    }

    /// Records come back in completion order, not seed order.
    pub async fn run(&self, seeds: &[String]) -> Vec<Record> {
        let iteration_workers = self.config.iteration_workers.max(1);
        info!(
            seeds = seeds.len(),
            iterations = self.config.iterations,
            iteration_workers,
            question_workers = self.config.question_workers.max(1),
            "starting generation run"
        );

        let outcomes: Vec<IterationOutcome> = stream::iter(0..self.config.iterations)
            .map(|iteration| self.run_iteration(iteration, seeds))
            .buffer_unordered(iteration_workers)
            .collect()
            .await;

        let dropped_iterations = outcomes.iter().filter(|o| o.dropped).count();
        let failed_questions: usize = outcomes.iter().map(|o| o.failed_questions).sum();
        let records: Vec<Record> = outcomes.into_iter().flat_map(|o| o.records).collect();
        info!(
            records = records.len(),
            dropped_iterations, failed_questions, "generation run finished"
        );
        records
    }

    async fn run_iteration(&self, iteration: usize, seeds: &[String]) -> IterationOutcome {
        let sampler = Sampler::new(self.client, &self.config.sampler_model);
        let set = match sampler
            .generate(
                seeds,
                &self.config.sample_prompt,
                self.config.sample_size,
                self.config.passthrough,
            )
            .await
        {
            Ok(set) => set,
            Err(e) => {
                warn!(iteration, error = %e, "sampling failed, dropping iteration");
                return IterationOutcome {
                    dropped: true,
                    ..Default::default()
                };
            }
        };
        info!(iteration, questions = set.questions.len(), "iteration sampled");

        let results: Vec<(String, Result<Record, LlmError>)> = stream::iter(set.questions)
            .map(|question| async move {
                let result = self.run_question(&question).await;
                (question, result)
            })
            .buffer_unordered(self.config.question_workers.max(1))
            .collect()
            .await;

        let mut outcome = IterationOutcome::default();
        for (question, result) in results {
            match result {
                Ok(record) => outcome.records.push(record),
                Err(e) => {
                    warn!(iteration, %question, error = %e, "answer failed, dropping question");
                    outcome.failed_questions += 1;
                }
            }
        }
        info!(iteration, records = outcome.records.len(), "iteration done");
        outcome
    }

    async fn run_question(&self, question: &str) -> Result<Record, LlmError> {
        let retrieved = ContextBuilder::new(self.backend, &self.config.retrieval)
            .build(question)
            .await;
        let responder = Responder::new(
            self.client,
            &self.config.responder_model,
            &self.config.respond_prompt,
        );
        let mut record = responder
            .answer(question, &retrieved.context, retrieved.used_links)
            .await?;
        if self.config.keep_context {
            record.context = Some(retrieved.context);
        }
        Ok(record)
    }
}
