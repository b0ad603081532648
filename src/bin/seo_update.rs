#![forbid(unsafe_code)]

//! Rewrites descriptions and tags for every not-yet-processed upload of the
//! configured channels.
//!
//! Run order: extract all channels with the API key, drop videos carrying the
//! processed marker, generate new metadata, authorize with OAuth and push the
//! updates. Rows that could not be written end up in a CSV file.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use log::info;
use rand_core::OsRng;
use std::io;
use std::path::PathBuf;

use tubeseo_tools::config::{
    DEFAULT_CHANNELS_PATH, SettingsOverrides, load_run_config, resolve_settings,
};
use tubeseo_tools::credentials::{ClientSecrets, CredentialStore, GoogleTokenEndpoint, authorize};
use tubeseo_tools::export::export_failures;
use tubeseo_tools::generation::{OpenAiClient, SeoWriter};
use tubeseo_tools::pipeline::{
    UpdateOptions, build_update, extract_channels, filter_unprocessed, generate_updates,
    update_videos,
};
use tubeseo_tools::retry::RetryPolicy;
use tubeseo_tools::youtube::{ApiAuth, YouTubeClient};

const DEFAULT_EXPORT_PATH: &str = "failed_videos.csv";
const MAX_GENERATION_ATTEMPTS: u32 = 5;

#[derive(Debug, Parser)]
#[command(about = "Refresh YouTube descriptions and tags with generated SEO metadata")]
struct Cli {
    /// Channels file (TOML).
    #[arg(long, default_value = DEFAULT_CHANNELS_PATH)]
    config: PathBuf,
    /// Dotenv file with API keys and paths.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Where rows that could not be updated are written.
    #[arg(long, default_value = DEFAULT_EXPORT_PATH)]
    export: PathBuf,
    /// OAuth token file; overrides YOUTUBE_CREDENTIALS_FILE.
    #[arg(long)]
    credentials: Option<PathBuf>,
    /// Chat model; overrides OPENAI_MODEL.
    #[arg(long)]
    model: Option<String>,
    /// Category code sent with every update instead of the current one.
    #[arg(long)]
    category: Option<u32>,
    /// Attempts per chat completion before giving up on a prompt.
    #[arg(long, default_value_t = 3)]
    generation_attempts: u32,
    /// Generate and log the new metadata without touching YouTube.
    #[arg(long)]
    skip_update: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if !(1..=MAX_GENERATION_ATTEMPTS).contains(&cli.generation_attempts) {
        bail!("--generation-attempts must be between 1 and {MAX_GENERATION_ATTEMPTS}");
    }

    let settings = resolve_settings(SettingsOverrides {
        env_path: cli.env_file.clone(),
        openai_model: cli.model.clone(),
        credentials_file: cli.credentials.clone(),
    })?;
    let run_config = load_run_config(&cli.config)?;

    let reader = YouTubeClient::new(ApiAuth::ApiKey(settings.youtube_api_key.clone()));
    let records = extract_channels(
        &reader,
        &run_config.channels,
        &RetryPolicy::extraction(),
        Utc::now(),
    )?;
    info!("Extracted {} video(s)", records.len());

    let records = filter_unprocessed(records);
    if records.is_empty() {
        println!("No videos left to update.");
        println!("YouTube update complete!");
        return Ok(());
    }

    let generator = OpenAiClient::new(
        settings.openai_api_key.clone(),
        settings.openai_model.clone(),
        &settings.openai_base_url,
    );
    let writer = SeoWriter::new(
        &generator,
        run_config.prompts.clone(),
        RetryPolicy::generation(cli.generation_attempts),
    );
    let pending = generate_updates(&writer, records, &mut OsRng);

    let options = UpdateOptions {
        category_override: cli.category,
        ..UpdateOptions::default()
    };

    if cli.skip_update {
        for item in &pending {
            let update = build_update(item, &options);
            info!(
                "Would update {} ({}): {} description char(s), tags [{}]",
                item.record.title,
                update.id,
                update.snippet.description.chars().count(),
                item.generated.serialized_tags()
            );
        }
        println!("Generated metadata for {} video(s); no updates sent.", pending.len());
        return Ok(());
    }

    let secrets_path = settings
        .client_secrets_file
        .as_deref()
        .context("YOUTUBE_CLIENT_SECRETS_FILE not set")?;
    let secrets = ClientSecrets::load(secrets_path)?;
    let store = CredentialStore::new(settings.credentials_file.clone());
    let token = authorize(
        &store,
        &secrets,
        &GoogleTokenEndpoint::default(),
        &mut io::stdin().lock(),
        Utc::now(),
    )?;

    let uploader = YouTubeClient::new(ApiAuth::Bearer(token.access_token));
    let report = update_videos(&uploader, pending, &options);

    if export_failures(&cli.export, &report.failed)? {
        println!(
            "{} video(s) could not be updated; details in {}",
            report.failed.len(),
            cli.export.display()
        );
    }

    println!(
        "Updated: {}  Skipped: {}  Failed: {}",
        report.updated.len(),
        report.skipped.len(),
        report.failed.len()
    );
    println!("YouTube update complete!");
    Ok(())
}
