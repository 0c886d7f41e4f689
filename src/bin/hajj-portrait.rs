//! CLI for Hajj Portrait - serve the web UI or edit a single photo.

use clap::{Args, Parser, Subcommand};
use hajj_portrait::{
    load_settings, EncodedImage, ImageFormat, ImageTransformer, Settings, TransformRequest,
    DEFAULT_PROMPT,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hajj-portrait")]
#[command(about = "Turn a portrait into a Hajj pilgrim photo with Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file
    #[arg(long, global = true, default_value = hajj_portrait::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Gemini model identifier (overrides settings)
    #[arg(long, global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web UI
    Serve(ServeArgs),

    /// Edit a single photo and write the result to disk
    Transform(TransformArgs),

    /// Verify the API key and model are usable
    Check,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on (overrides settings)
    #[arg(short, long)]
    bind: Option<String>,
}

#[derive(Args)]
struct TransformArgs {
    /// Input photo
    input: PathBuf,

    /// Output file path [default: hajj-portrait.<ext of the returned image>]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Editing instruction
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(model) = cli.model {
        settings.model = model;
    }

    match cli.command {
        Commands::Serve(args) => {
            if let Some(bind) = args.bind {
                settings.bind = bind;
            }
            hajj_portrait::server::serve(&settings).await?;
        }
        Commands::Transform(args) => {
            transform_file(&settings, args).await?;
        }
        Commands::Check => {
            check(&settings).await?;
        }
    }

    Ok(())
}

async fn transform_file(settings: &Settings, args: TransformArgs) -> anyhow::Result<()> {
    let transformer = settings.transformer()?;

    let declared = args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ImageFormat::from_extension)
        .map(|f| f.mime_type());
    let input = EncodedImage::from_upload(std::fs::read(&args.input)?, declared);

    let request = TransformRequest::new(input, args.prompt);
    let image = transformer.transform(&request).await?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(image.file_name()));
    image.save(&output)?;

    if args.json {
        let result = serde_json::json!({
            "success": true,
            "output": output.display().to_string(),
            "size_bytes": image.size(),
            "mime_type": image.image.mime_type(),
            "model": image.metadata.model,
            "duration_ms": image.metadata.duration_ms,
            "text": image.metadata.text,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Edited portrait: {} ({} bytes) via {}",
            output.display(),
            image.size(),
            transformer.name()
        );
        if let Some(duration) = image.metadata.duration_ms {
            println!("Duration: {}ms", duration);
        }
    }

    Ok(())
}

async fn check(settings: &Settings) -> anyhow::Result<()> {
    let transformer = settings.transformer()?;
    transformer.health_check().await?;
    println!("✓ {} ({}) is reachable", transformer.name(), transformer.model());
    Ok(())
}
