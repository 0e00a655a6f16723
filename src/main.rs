mod cli;
mod config;
mod fetch;
mod llm;
mod pipeline;
mod records;
mod retry;
mod search;

pub const USER_AGENT: &str = concat!("ragsynth/", env!("CARGO_PKG_VERSION"));

use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use tracing::info;

use cli::{BackendKind, BackendSettings, Cli, ConfigError};
use fetch::PageFetcher;
use llm::OpenAiClient;
use pipeline::Pipeline;
use search::{Backend, OrganicBackend, QueryRewriter, SerpApiBackend, SerperBackend};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum redirect hops before aborting.
const MAX_REDIRECTS: usize = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let directive = if cli.verbose {
        "ragsynth=debug"
    } else {
        "ragsynth=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    let settings = cli
        .into_settings()
        .inspect_err(|e| tracing::error!("invalid configuration: {e}"))?;
    let seeds = records::load_seeds(&settings.seed_file)?;

    let http = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()?;
    let llm = OpenAiClient::new(
        http.clone(),
        &settings.llm.base_url,
        settings.llm.api_key.clone(),
    );
    let backend = build_backend(http, &settings.backend, &llm)?;
    info!(backend = ?settings.backend.kind, output = %settings.output.display(), "configured");

    let records = Pipeline::new(&llm, &backend, &settings.run)
        .run(&seeds)
        .await;

    records::write_records(&settings.output, &records)
        .inspect_err(|e| tracing::error!("failed to write records: {e}"))?;
    Ok(())
}

fn build_backend(
    http: Client,
    settings: &BackendSettings,
    llm: &OpenAiClient,
) -> Result<Backend<OpenAiClient>, ConfigError> {
    let fetcher = PageFetcher::new(http.clone(), settings.extract);
    let key = || {
        settings
            .api_key
            .clone()
            .ok_or(ConfigError::MissingSearchKey(settings.kind))
    };
    Ok(match settings.kind {
        BackendKind::Serpapi => Backend::SerpApi(SerpApiBackend::new(http, key()?, fetcher)),
        BackendKind::Serper => Backend::Serper(SerperBackend::new(http, key()?, fetcher)),
        BackendKind::Organic => {
            let rewriter = settings
                .rewrite_model
                .as_ref()
                .map(|model| QueryRewriter::new(llm.clone(), model.as_str()));
            Backend::Organic(OrganicBackend::new(
                http,
                settings.lang.as_str(),
                fetcher,
                rewriter,
            ))
        }
    })
}
