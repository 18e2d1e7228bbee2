//! Batch runner: applies the OCR pipeline to a file, a directory, or an
//! object-store prefix.

mod assets;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use underlay_core::storage::ObjectStore;
use underlay_core::{process, ProcessOptions, TextractProvider};

use assets::{AssetSource, AssetTarget};

#[derive(Parser, Debug)]
#[command(version, about = "Underlay - searchable text layers for scanned PDFs")]
struct Args {
    /// Directory for per-file scratch space
    #[arg(long, env = "TMP_PATH")]
    tmp_path: PathBuf,

    /// Remove each file's scratch directory after processing
    #[arg(long, env = "CLEANUP_TMP_FILES", default_value_t = false)]
    cleanup_tmp_files: bool,

    /// Global OCR confidence threshold, 0..1
    #[arg(long, env = "CONFIDENCE_THRESHOLD")]
    confidence_threshold: f32,

    /// Also clean visible text covered by images, and never draw OCR text
    /// over text that is still visible
    #[arg(long, env = "USE_AGGRESSIVE_STRATEGY", default_value_t = false)]
    use_aggressive_strategy: bool,

    /// Only process this page (1-based) and emit it together with a page
    /// showing the visible overlay
    #[arg(long, env = "INPUT_DEBUG_PAGE")]
    debug_page: Option<usize>,

    /// Credentials profile for the OCR provider
    #[arg(long, env = "TEXTRACT_AWS_PROFILE")]
    textract_aws_profile: Option<String>,

    /// Local input file or directory (mutually exclusive with the S3 input)
    #[arg(long, env = "INPUT_PATH", conflicts_with = "input_s3_bucket")]
    input_path: Option<PathBuf>,
    #[arg(long, env = "INPUT_S3_BUCKET")]
    input_s3_bucket: Option<String>,
    #[arg(long, env = "INPUT_S3_PREFIX", default_value = "")]
    input_s3_prefix: String,
    #[arg(long, env = "INPUT_AWS_PROFILE")]
    input_aws_profile: Option<String>,
    /// Skip inputs that already have an output at the target
    #[arg(long, env = "INPUT_SKIP_EXISTING", default_value_t = false)]
    input_skip_existing: bool,

    /// Local output directory (mutually exclusive with the S3 output)
    #[arg(long, env = "OUTPUT_PATH", conflicts_with = "output_s3_bucket")]
    output_path: Option<PathBuf>,
    #[arg(long, env = "OUTPUT_S3_BUCKET")]
    output_s3_bucket: Option<String>,
    #[arg(long, env = "OUTPUT_S3_PREFIX", default_value = "")]
    output_s3_prefix: String,
    #[arg(long, env = "OUTPUT_AWS_PROFILE")]
    output_aws_profile: Option<String>,
}

async fn load_source(args: &Args) -> anyhow::Result<AssetSource> {
    if let Some(input_path) = &args.input_path {
        return Ok(AssetSource::Files {
            input_path: input_path.clone(),
        });
    }
    if let Some(bucket) = &args.input_s3_bucket {
        let store = ObjectStore::connect(
            None,
            args.input_aws_profile.as_deref(),
            bucket,
            &args.input_s3_prefix,
        )
        .await;
        return Ok(AssetSource::Store { store });
    }
    anyhow::bail!("no input specified: set --input-path or --input-s3-bucket")
}

async fn load_target(args: &Args) -> anyhow::Result<AssetTarget> {
    if let Some(output_path) = &args.output_path {
        return Ok(AssetTarget::Files {
            output_path: output_path.clone(),
        });
    }
    if let Some(bucket) = &args.output_s3_bucket {
        let store = ObjectStore::connect(
            None,
            args.output_aws_profile.as_deref(),
            bucket,
            &args.output_s3_prefix,
        )
        .await;
        return Ok(AssetTarget::Store { store });
    }
    anyhow::bail!("no output specified: set --output-path or --output-s3-bucket")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    if let Ok(profile) = std::env::var("OCR_PROFILE") {
        dotenvy::from_filename(format!(".env.{profile}")).ok();
    }
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new("underlay_cli=info,underlay_core=info")),
        )
        .init();

    let provider = TextractProvider::from_env(args.textract_aws_profile.as_deref()).await;
    let target = load_target(&args).await?;
    let source = load_source(&args).await?;

    let skip: Vec<String> = if args.input_skip_existing {
        let existing = target.existing_filenames().await?;
        info!("found {} existing objects at the target", existing.len());
        existing
    } else {
        Vec::new()
    };

    let options = ProcessOptions {
        confidence_threshold: args.confidence_threshold,
        use_aggressive_strategy: args.use_aggressive_strategy,
        debug_page: args.debug_page.map(|page| page.saturating_sub(1)),
    };

    for name in source.filenames().await? {
        if skip.contains(&name) {
            continue;
        }
        info!("{name}");

        // Separate scratch dir per file so a partial run leaves nothing
        // behind for the next one.
        let tmp_dir = args.tmp_path.join(&name);
        std::fs::create_dir_all(&tmp_dir)
            .with_context(|| format!("cannot create {}", tmp_dir.display()))?;
        let input_path = tmp_dir.join("input.pdf");
        let output_path = tmp_dir.join("output.pdf");

        let result = async {
            source.fetch(&name, &input_path).await?;
            let result = process(&input_path, &output_path, &tmp_dir, &provider, &options).await?;
            target
                .save(&name, &output_path, result.number_of_pages)
                .await?;
            anyhow::Ok(result)
        }
        .await;

        match result {
            Ok(result) => info!(
                "finished {name} ({} pages)",
                result
                    .number_of_pages
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".into())
            ),
            Err(err) => error!("failed to process {name}: {err:#}"),
        }

        if args.cleanup_tmp_files {
            if let Err(err) = std::fs::remove_dir_all(&tmp_dir) {
                error!("cannot remove {}: {err}", tmp_dir.display());
            }
        }
    }
    Ok(())
}
