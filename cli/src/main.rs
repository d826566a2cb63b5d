use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use restyle_core::catalog::{Attribute, Ethnicity, HairColor, Length, Sex};
use restyle_core::{
    ApiClient, Config, ImageAsset, JsonCatalog, OutputMetadata, RunJournal, StyleCatalog,
    StyleFilter, SynthesisRequest, Synthesizer,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "restyle")]
#[command(author, version, about = "Try on a hairstyle from a reference photo")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a portrait with the hairstyle of a reference photo
    Synthesize {
        /// Portrait of the person to restyle
        #[arg(long)]
        original: PathBuf,

        /// Reference photo(s) showing the target hairstyle
        #[arg(long = "reference", required_unless_present = "style")]
        references: Vec<PathBuf>,

        /// Name of a catalog style to use as the reference
        #[arg(long, requires = "catalog", conflicts_with = "references")]
        style: Option<String>,

        /// Style catalog (JSON)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Output width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Output height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Length of the before/after animation in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Reject results that look little like the reference
        #[arg(long)]
        quality_check: bool,

        /// Whole-pipeline attempts before giving up
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Number of concurrent candidate generations
        #[arg(long)]
        fan_out: Option<usize>,

        /// Skip the before/after animation
        #[arg(long)]
        no_transition: bool,

        /// Output directory
        #[arg(long)]
        output_dir: PathBuf,

        /// Config file path (optional)
        #[arg(long)]
        config: Option<PathBuf>,

        /// API key (overrides the config file)
        #[arg(long, env = "RESTYLE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// List reference styles from a catalog
    Styles {
        /// Style catalog (JSON)
        #[arg(long)]
        catalog: PathBuf,

        #[arg(long)]
        hair_color: Option<String>,

        #[arg(long)]
        ethnicity: Option<String>,

        #[arg(long)]
        sex: Option<String>,

        #[arg(long)]
        length: Option<String>,

        /// Maximum number of records (1-100)
        #[arg(long)]
        max_records: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show statistics from the run journal
    Stats {
        /// Config file path (optional)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a default configuration file
    InitConfig {
        /// Output path for config file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

struct SynthesizeArgs {
    original: PathBuf,
    references: Vec<PathBuf>,
    style: Option<String>,
    catalog: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    duration_ms: Option<u64>,
    quality_check: bool,
    max_attempts: Option<u32>,
    fan_out: Option<usize>,
    no_transition: bool,
    output_dir: PathBuf,
    config: Option<PathBuf>,
    api_key: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Synthesize {
            original,
            references,
            style,
            catalog,
            width,
            height,
            duration_ms,
            quality_check,
            max_attempts,
            fan_out,
            no_transition,
            output_dir,
            config,
            api_key,
        } => {
            run_synthesize(SynthesizeArgs {
                original,
                references,
                style,
                catalog,
                width,
                height,
                duration_ms,
                quality_check,
                max_attempts,
                fan_out,
                no_transition,
                output_dir,
                config,
                api_key,
            })
            .await?;
        }

        Commands::Styles {
            catalog,
            hair_color,
            ethnicity,
            sex,
            length,
            max_records,
            json,
        } => {
            let filter = StyleFilter {
                hair_color: attribute::<HairColor>("hair color", hair_color.as_deref()),
                ethnicity: attribute::<Ethnicity>("ethnicity", ethnicity.as_deref()),
                sex: attribute::<Sex>("sex", sex.as_deref()),
                length: attribute::<Length>("length", length.as_deref()),
                max_records,
            };
            let records = JsonCatalog::new(catalog).styles(&filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No matching styles");
            } else {
                for record in &records {
                    println!("{}  {}", record.name, record.image_url);
                }
            }
        }

        Commands::Stats { config, json } => {
            let config = load_config(config.as_deref())?;
            let journal = match &config.journal_path {
                Some(path) => RunJournal::with_path(PathBuf::from(path))?,
                None => RunJournal::new()?,
            };
            let stats = journal.get_stats()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("=== restyle run statistics ===");
                println!();
                println!("Total runs: {}", stats.total_runs);
                println!(
                    "Completed: {} ({:.1}%)",
                    stats.completed,
                    stats.success_rate * 100.0
                );
                println!("  Mean attempts: {:.2}", stats.mean_attempts);
                println!("  Judged: {}", stats.judged);
                println!("  Without transition: {}", stats.missing_transition);
                println!("Failed: {}", stats.failed);

                if !stats.failures_by_stage.is_empty() {
                    println!();
                    println!("Failed attempts by stage:");
                    for (stage, count) in &stats.failures_by_stage {
                        println!("  {:?}: {}", stage, count);
                    }
                }
            }
        }

        Commands::InitConfig { output } => {
            let config = Config::default();
            let output_path = output.unwrap_or_else(|| PathBuf::from("restyle.toml"));

            config.save(&output_path)?;
            println!("Created config file: {}", output_path.display());
            println!();
            println!("Edit this file to configure:");
            println!("  - API endpoint, key and models");
            println!("  - Output size, fan-out and attempts");
            println!("  - ffmpeg path and transition length");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Ok(match path {
        Some(path) => {
            log::info!("Loading config from {}", path.display());
            Config::load(path)?
        }
        None => {
            log::info!("Using default config");
            Config::load_or_default()
        }
    })
}

fn attribute<T: Attribute>(name: &str, value: Option<&str>) -> Option<T> {
    let value = value?;
    let parsed = T::parse(value);
    if parsed.is_none() {
        log::warn!("Ignoring unknown {} '{}'", name, value);
    }
    parsed
}

async fn read_image(path: &Path) -> Result<ImageAsset> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ImageAsset::from_bytes(bytes))
}

async fn run_synthesize(args: SynthesizeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(key) = args.api_key {
        config.api.api_key = Some(key);
    }
    if let Some(fan_out) = args.fan_out {
        config.pipeline.fan_out = fan_out;
    }
    if args.no_transition {
        config.transition.enabled = false;
    }

    let original = read_image(&args.original).await?;
    let references = match (&args.style, &args.catalog) {
        (Some(style), Some(catalog)) => {
            let record = JsonCatalog::new(catalog)
                .find(style)
                .await?
                .with_context(|| format!("Style '{}' not found in catalog", style))?;
            log::info!("Using catalog style '{}'", record.name);
            let client = ApiClient::new(&config.api)?;
            vec![client.download(&record.image_url).await?]
        }
        _ => {
            let mut images = Vec::with_capacity(args.references.len());
            for path in &args.references {
                images.push(read_image(path).await?);
            }
            images
        }
    };

    let synthesizer = Synthesizer::new(config)?;

    let mut request = SynthesisRequest::new(original, references);
    request.width = args.width;
    request.height = args.height;
    request.transition_duration = args.duration_ms.map(Duration::from_millis);
    request.max_attempts = args.max_attempts;
    if args.quality_check {
        request.quality_check = Some(true);
    }

    let result = synthesizer.synthesize(request).await?;

    std::fs::create_dir_all(&args.output_dir)?;

    let image_path = args.output_dir.join(result.composite_file_name());
    std::fs::write(&image_path, result.image.bytes())?;
    log::info!("Saved composite to {}", image_path.display());

    if let Some(transition) = &result.transition {
        let transition_path = args.output_dir.join("transition.gif");
        std::fs::write(&transition_path, transition.bytes())?;
        log::info!("Saved transition to {}", transition_path.display());
    }

    let metadata: OutputMetadata = (&result).into();
    let metadata_path = args.output_dir.join("metadata.json");
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!(
        "Synthesized composite in {} attempt(s) into {}",
        result.metadata.attempts,
        args.output_dir.display()
    );
    if result.metadata.judged {
        println!(
            "  Picked candidate #{} of {}",
            result.metadata.chosen_ordinal, result.metadata.candidates_succeeded
        );
    }
    if let Some(err) = &result.metadata.transition_error {
        println!("  Transition unavailable: {}", err);
    }

    Ok(())
}
