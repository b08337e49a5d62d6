use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facereview::alarms::{self, AlarmQuery, MongoAlarmSource};
use facereview::annotate::Annotator;
use facereview::config::{self, Config};
use facereview::review::Review;
use facereview::viewer::WindowViewer;
use facereview::{known_faces, Pipeline};
use log::info;

#[derive(Parser)]
#[command(name = "facereview")]
#[command(
    version,
    about = "Step through stored alarms and re-run face recognition on them"
)]
struct Cli {
    /// Config file (defaults to the per-user config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Review alarms interactively
    Review(ReviewArgs),
    /// Print the effective configuration
    ShowConfig(ReviewArgs),
    /// Open config file in editor
    Config,
    /// Convert a known-face table between JSON and postcard
    ConvertEncodings {
        input: PathBuf,
        output: PathBuf,
    },
}

/// Command line overrides of the config file.
#[derive(Args)]
struct ReviewArgs {
    /// Maximum number of alarms to fetch
    #[arg(short, long)]
    limit: Option<usize>,
    /// Show most recent alarms first
    #[arg(short, long)]
    descending: bool,
    /// Largest embedding distance accepted as a match
    #[arg(short, long)]
    tolerance: Option<f32>,
    /// Re-samples averaged per face embedding
    #[arg(long)]
    jitters: Option<u32>,
    /// Times a person crop is doubled before face detection
    #[arg(long)]
    upsample: Option<u32>,
    /// Minimum object confidence (0-100) for a person region
    #[arg(long)]
    min_confidence: Option<f64>,
    /// Directory for saved alarms
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// Known-face table
    #[arg(long)]
    encodings: Option<PathBuf>,
    /// MongoDB connection string
    #[arg(long)]
    db_url: Option<String>,
}

impl ReviewArgs {
    fn apply(self, cfg: &mut Config) {
        if let Some(v) = self.limit {
            cfg.database.limit = v;
        }
        if self.descending {
            cfg.database.descending = true;
        }
        if let Some(v) = self.db_url {
            cfg.database.url = v;
        }
        if let Some(v) = self.tolerance {
            cfg.recognition.tolerance = v;
        }
        if let Some(v) = self.jitters {
            cfg.recognition.jitters = v;
        }
        if let Some(v) = self.upsample {
            cfg.recognition.upsample = v;
        }
        if let Some(v) = self.encodings {
            cfg.recognition.encodings_path = v;
        }
        if let Some(v) = self.min_confidence {
            cfg.review.min_confidence = v;
        }
        if let Some(v) = self.save_dir {
            cfg.review.save_dir = v;
        }
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Review(args) => {
            args.apply(&mut cfg);
            cfg.validate().context("invalid configuration")?;
            review(&cfg)
        }
        Commands::ShowConfig(args) => {
            args.apply(&mut cfg);
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
        Commands::Config => open_config(cli.config),
        Commands::ConvertEncodings { input, output } => convert_encodings(&input, &output),
    }
}

fn review(cfg: &Config) -> Result<()> {
    let known = known_faces::load(&cfg.recognition.encodings_path)
        .context("Failed to load known face encodings")?;

    let pipeline = Pipeline::load(
        &cfg.recognition.detector_model,
        &cfg.recognition.recognizer_model,
        cfg.recognition.pipeline_options(),
    )
    .context("Failed to initialize face recognition pipeline")?;

    let fetched = {
        let source = MongoAlarmSource::connect(&cfg.database)?;
        let query = AlarmQuery {
            label: &cfg.review.person_label,
            limit: cfg.database.limit,
        };
        alarms::fetch(&source, &query, cfg.database.descending)?
    };

    let annotator = Annotator::load(&cfg.review.font_path);
    let viewer = WindowViewer::new(cfg.review.window_title.clone());
    let mut review = Review::new(cfg, &fetched, &known, pipeline, viewer, annotator)?;
    let summary = review.run()?;

    info!(
        "review finished ({:?}): {} frame(s) shown, {} alarm(s) saved",
        summary.end,
        summary.shown.len(),
        summary.saved.len()
    );
    Ok(())
}

fn convert_encodings(input: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let faces = known_faces::load(input)?;
    let table = known_faces::EncodingTable {
        encodings: faces.encodings().iter().map(|e| e.to_vec()).collect(),
        names: faces.names().to_vec(),
    };
    known_faces::save(output, &table)?;
    info!("wrote {} encoding(s) to {}", table.names.len(), output.display());
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.clone());
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(&config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
