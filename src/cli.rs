use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::config::{
    ApiKey, DEFAULT_MODEL, DEFAULT_RESPOND_PROMPT, DEFAULT_SAMPLE_PROMPT, RunConfig,
    render_sample_prompt,
};
use crate::fetch::ExtractMode;
use crate::llm::client::DEFAULT_BASE_URL;
use crate::records::{Format, RecordsError};
use crate::search::RetrievalParams;

/// Keyed APIs stop paging well before this.
const MAX_PAGES: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Google results via SerpApi (needs a search API key)
    Serpapi,
    /// Google results via Serper (needs a search API key)
    Serper,
    /// Scraped result page, no key required
    Organic,
}

impl BackendKind {
    fn needs_key(self) -> bool {
        matches!(self, BackendKind::Serpapi | BackendKind::Serper)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--search-api-key (or SEARCH_API_KEY) is required for the {0:?} backend")]
    MissingSearchKey(BackendKind),

    #[error("cannot read prompt file {path}: {source}")]
    PromptFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] RecordsError),
}

/// Synthetic question/answer generation grounded in web search results.
#[derive(Parser, Debug)]
#[command(name = "ragsynth", version, about)]
pub struct Cli {
    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub llm_base_url: String,

    /// LLM API key (optional for local endpoints)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Model generating question variants
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub sampler_model: String,

    /// Model answering questions from retrieved context
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub responder_model: String,

    /// Model rewriting questions into search queries (organic backend only)
    #[arg(long)]
    pub rewrite_model: Option<String>,

    #[arg(long, value_enum, default_value_t = BackendKind::Serpapi)]
    pub backend: BackendKind,

    /// API key for the serpapi/serper backends
    #[arg(long, env = "SEARCH_API_KEY", hide_env_values = true)]
    pub search_api_key: Option<String>,

    /// Result language for the organic backend
    #[arg(long, default_value = "en")]
    pub search_lang: String,

    /// Seed questions (.txt, .json, .jsonl, .csv or .xlsx)
    #[arg(long)]
    pub seed_file: PathBuf,

    /// Output file; format follows the extension
    #[arg(short, long)]
    pub output: PathBuf,

    /// Variants requested per seed
    #[arg(long, default_value_t = 3)]
    pub variants: usize,

    /// Result pages per query (keyed backends)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=MAX_PAGES))]
    pub pages: u32,

    /// Fetched links per question
    #[arg(long, default_value_t = 3)]
    pub links: usize,

    /// Domain to exclude from retrieval; repeatable or comma-separated
    #[arg(long = "skip-domain", value_delimiter = ',')]
    pub skip_domains: Vec<String>,

    /// Seeds shown to the sampler per iteration
    #[arg(long, value_parser = parse_positive)]
    pub sample_size: Option<usize>,

    /// Answer seeds directly instead of generating variants
    #[arg(long)]
    pub passthrough: bool,

    #[arg(long, default_value_t = 1)]
    pub iterations: usize,

    #[arg(long, default_value_t = 1)]
    pub iteration_workers: usize,

    #[arg(long, default_value_t = 4)]
    pub question_workers: usize,

    /// Include retrieved context in each output record
    #[arg(long)]
    pub keep_context: bool,

    /// Extract the main article as Markdown instead of the whole body text
    #[arg(long)]
    pub readability: bool,

    /// File replacing the default variant prompt; `{count}` is substituted
    #[arg(long)]
    pub sample_prompt: Option<PathBuf>,

    /// File replacing the default answer prompt
    #[arg(long)]
    pub respond_prompt: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<ApiKey>,
}

#[derive(Debug)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub api_key: Option<ApiKey>,
    pub lang: String,
    pub rewrite_model: Option<String>,
    pub extract: ExtractMode,
}

/// Everything `main` needs, validated before any network work starts.
#[derive(Debug)]
pub struct Settings {
    pub run: RunConfig,
    pub llm: LlmSettings,
    pub backend: BackendSettings,
    pub seed_file: PathBuf,
    pub output: PathBuf,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        Format::from_path(&self.seed_file)?;
        Format::from_path(&self.output)?;

        let search_key = self.search_api_key.as_deref().and_then(ApiKey::new);
        if self.backend.needs_key() && search_key.is_none() {
            return Err(ConfigError::MissingSearchKey(self.backend));
        }

        let sample_template = match &self.sample_prompt {
            Some(path) => read_prompt(path)?,
            None => DEFAULT_SAMPLE_PROMPT.to_string(),
        };
        let respond_prompt = match &self.respond_prompt {
            Some(path) => read_prompt(path)?,
            None => DEFAULT_RESPOND_PROMPT.to_string(),
        };

        let skip_domains = self
            .skip_domains
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();

        let run = RunConfig {
            sampler_model: self.sampler_model,
            responder_model: self.responder_model,
            sample_prompt: render_sample_prompt(&sample_template, self.variants),
            respond_prompt,
            retrieval: RetrievalParams {
                page_budget: self.pages,
                link_budget: self.links,
                skip_domains,
            },
            sample_size: self.sample_size,
            passthrough: self.passthrough,
            iterations: self.iterations,
            iteration_workers: self.iteration_workers,
            question_workers: self.question_workers,
            keep_context: self.keep_context,
        };

        Ok(Settings {
            run,
            llm: LlmSettings {
                base_url: self.llm_base_url,
                api_key: self.llm_api_key.as_deref().and_then(ApiKey::new),
            },
            backend: BackendSettings {
                kind: self.backend,
                api_key: search_key,
                lang: self.search_lang,
                rewrite_model: self.rewrite_model.filter(|m| !m.trim().is_empty()),
                extract: if self.readability {
                    ExtractMode::Readability
                } else {
                    ExtractMode::Body
                },
            },
            seed_file: self.seed_file,
            output: self.output,
        })
    }
}

fn parse_positive(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn read_prompt(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::PromptFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Cli {
        let mut args = vec![
            "ragsynth",
            "--seed-file",
            "seeds.txt",
            "--output",
            "out.jsonl",
        ];
        args.extend_from_slice(extra);
        let mut cli = Cli::try_parse_from(args).unwrap();
        cli.search_api_key = None;
        cli
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&[]);
        assert_eq!(cli.backend, BackendKind::Serpapi);
        assert_eq!(cli.variants, 3);
        assert_eq!(cli.pages, 1);
        assert_eq!(cli.links, 3);
        assert_eq!(cli.iterations, 1);
        assert_eq!(cli.iteration_workers, 1);
        assert_eq!(cli.question_workers, 4);
        assert_eq!(cli.sampler_model, DEFAULT_MODEL);
        assert_eq!(cli.search_lang, "en");
        assert!(!cli.passthrough);
        assert!(!cli.keep_context);
    }

    #[test]
    fn seed_file_and_output_are_required() {
        assert!(Cli::try_parse_from(["ragsynth", "--output", "o.json"]).is_err());
        assert!(Cli::try_parse_from(["ragsynth", "--seed-file", "s.txt"]).is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = Cli::try_parse_from([
            "ragsynth",
            "--seed-file",
            "s.txt",
            "-o",
            "o.json",
            "--backend",
            "bing",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn zero_sample_size_is_rejected() {
        let result = Cli::try_parse_from([
            "ragsynth",
            "--seed-file",
            "s.txt",
            "-o",
            "o.json",
            "--sample-size",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn page_budget_is_bounded() {
        for pages in ["0", "500000000"] {
            let result = Cli::try_parse_from([
                "ragsynth",
                "--seed-file",
                "s.txt",
                "-o",
                "o.json",
                "--pages",
                pages,
            ]);
            assert!(result.is_err(), "--pages {pages} accepted");
        }
    }

    #[test]
    fn skip_domains_accept_repeats_and_commas() {
        let cli = parse(&[
            "--backend",
            "organic",
            "--skip-domain",
            "wikipedia.org, reddit.com",
            "--skip-domain",
            "quora.com",
        ]);
        let settings = cli.into_settings().unwrap();
        assert_eq!(
            settings.run.retrieval.skip_domains,
            vec!["wikipedia.org", "reddit.com", "quora.com"]
        );
    }

    #[test]
    fn keyed_backend_without_key_is_config_error() {
        let cli = parse(&["--backend", "serper"]);
        assert!(matches!(
            cli.into_settings(),
            Err(ConfigError::MissingSearchKey(BackendKind::Serper))
        ));
    }

    #[test]
    fn blank_search_key_counts_as_missing() {
        let mut cli = parse(&[]);
        cli.search_api_key = Some("   ".to_string());
        assert!(matches!(
            cli.into_settings(),
            Err(ConfigError::MissingSearchKey(BackendKind::Serpapi))
        ));
    }

    #[test]
    fn unsupported_output_extension_is_rejected() {
        let mut cli = parse(&["--backend", "organic"]);
        cli.output = PathBuf::from("out.parquet");
        assert!(matches!(cli.into_settings(), Err(ConfigError::Format(_))));
    }

    #[test]
    fn settings_carry_run_parameters() {
        let mut cli = parse(&[
            "--pages",
            "2",
            "--links",
            "5",
            "--variants",
            "7",
            "--sample-size",
            "2",
            "--iterations",
            "3",
            "--passthrough",
            "--keep-context",
            "--readability",
        ]);
        cli.search_api_key = Some("key".to_string());
        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.run.retrieval.page_budget, 2);
        assert_eq!(settings.run.retrieval.link_budget, 5);
        assert_eq!(settings.run.sample_size, Some(2));
        assert_eq!(settings.run.iterations, 3);
        assert!(settings.run.passthrough);
        assert!(settings.run.keep_context);
        assert!(settings.run.sample_prompt.contains("generate 7 other questions"));
        assert_eq!(settings.backend.extract, ExtractMode::Readability);
        assert_eq!(settings.backend.api_key.unwrap().expose(), "key");
    }

    #[test]
    fn prompt_files_replace_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let sample = dir.path().join("sample.txt");
        let respond = dir.path().join("respond.txt");
        fs::write(&sample, "Give {count} rewrites.").unwrap();
        fs::write(&respond, "Answer tersely.").unwrap();

        let cli = parse(&[
            "--backend",
            "organic",
            "--variants",
            "2",
            "--sample-prompt",
            sample.to_str().unwrap(),
            "--respond-prompt",
            respond.to_str().unwrap(),
        ]);
        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.run.sample_prompt, "Give 2 rewrites.");
        assert_eq!(settings.run.respond_prompt, "Answer tersely.");
    }

    #[test]
    fn missing_prompt_file_is_config_error() {
        let cli = parse(&["--backend", "organic", "--sample-prompt", "/nonexistent/p.txt"]);
        assert!(matches!(
            cli.into_settings(),
            Err(ConfigError::PromptFile { .. })
        ));
    }
}
