//! Job front-end: accepts OCR jobs over HTTP, runs them on background
//! tasks, and hands out results on collection.

mod task;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use underlay_core::storage::ObjectStore;
use underlay_core::{process, ProcessOptions, ProcessResult, TextractProvider};

use task::{Collected, TaskOutcome, TaskRegistry};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Underlay OCR job front-end")]
struct Args {
    /// API listen address
    #[arg(long, env = "API_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen_addr: String,

    /// Directory for per-job scratch space
    #[arg(long, env = "TMP_PATH")]
    tmp_path: PathBuf,

    /// Global OCR confidence threshold, 0..1
    #[arg(long, env = "CONFIDENCE_THRESHOLD")]
    confidence_threshold: f32,

    /// Also clean visible text covered by images, and never draw OCR text
    /// over text that is still visible
    #[arg(long, env = "USE_AGGRESSIVE_STRATEGY", default_value_t = false)]
    use_aggressive_strategy: bool,

    /// Accept jobs and mark them finished without doing any work
    /// (smoke-test mode)
    #[arg(long, env = "SKIP_PROCESSING", default_value_t = false)]
    skip_processing: bool,

    /// Only process this page (1-based) and emit it together with a page
    /// showing the visible overlay
    #[arg(long, env = "DEBUG_PAGE")]
    debug_page: Option<usize>,

    /// Named credentials profile for the object stores
    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Separate credentials profile for the OCR provider
    #[arg(long, env = "TEXTRACT_AWS_PROFILE")]
    textract_aws_profile: Option<String>,

    #[arg(long, env = "S3_INPUT_ENDPOINT")]
    s3_input_endpoint: Option<String>,
    #[arg(long, env = "S3_INPUT_BUCKET")]
    s3_input_bucket: String,
    #[arg(long, env = "S3_INPUT_FOLDER", default_value = "")]
    s3_input_folder: String,

    #[arg(long, env = "S3_OUTPUT_ENDPOINT")]
    s3_output_endpoint: Option<String>,
    #[arg(long, env = "S3_OUTPUT_BUCKET")]
    s3_output_bucket: String,
    #[arg(long, env = "S3_OUTPUT_FOLDER", default_value = "")]
    s3_output_folder: String,
}

#[derive(Clone)]
struct AppState {
    args: Arc<Args>,
    registry: Arc<TaskRegistry>,
    input_store: ObjectStore,
    output_store: ObjectStore,
    provider: Arc<TextractProvider>,
}

fn load_env_files() {
    info!("loading env variables from '.env'");
    dotenvy::dotenv().ok();
    if let Ok(profile) = std::env::var("OCR_PROFILE") {
        let env_file = format!(".env.{profile}");
        info!("loading env variables from '{env_file}'");
        dotenvy::from_filename(env_file).ok();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new("underlay_api=debug,underlay_core=debug")),
        )
        .init();

    let input_store = ObjectStore::connect(
        args.s3_input_endpoint.as_deref(),
        args.aws_profile.as_deref(),
        &args.s3_input_bucket,
        &args.s3_input_folder,
    )
    .await;
    let output_store = ObjectStore::connect(
        args.s3_output_endpoint.as_deref(),
        args.aws_profile.as_deref(),
        &args.s3_output_bucket,
        &args.s3_output_folder,
    )
    .await;
    let provider = Arc::new(
        TextractProvider::from_env(
            args.textract_aws_profile
                .as_deref()
                .or(args.aws_profile.as_deref()),
        )
        .await,
    );

    let state = AppState {
        args: Arc::new(args),
        registry: Arc::new(TaskRegistry::default()),
        input_store,
        output_store,
        provider,
    };

    let app = Router::new()
        .route("/", post(start_handler))
        .route("/collect", post(collect_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.args.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    file: String,
}

#[derive(Debug, Deserialize)]
struct CollectPayload {
    file: String,
}

async fn start_handler(
    State(state): State<AppState>,
    Json(payload): Json<StartPayload>,
) -> impl IntoResponse {
    if !payload.file.ends_with(".pdf") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "input must be a PDF file"})),
        )
            .into_response();
    }
    match state.input_store.exists(&payload.file).await {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"message": "file not found in input store"})),
            )
                .into_response();
        }
        Err(err) => {
            error!("input store lookup failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "input store unavailable"})),
            )
                .into_response();
        }
    }

    if state.registry.start(&payload.file) {
        let file = payload.file.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let outcome = if state.args.skip_processing {
                info!("skip-processing mode, marking {file} finished");
                TaskOutcome::Success(ProcessResult::default())
            } else {
                match run_job(&state, &file).await {
                    Ok(result) => TaskOutcome::Success(result),
                    Err(err) => {
                        error!("job for {file} failed: {err:#}");
                        TaskOutcome::Failure
                    }
                }
            };
            state.registry.finish(&file, outcome);
        });
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn collect_handler(
    State(state): State<AppState>,
    Json(payload): Json<CollectPayload>,
) -> impl IntoResponse {
    match state.registry.collect(&payload.file) {
        Collected::NoSuchTask => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"message": "OCR is not running for this file"})),
        ),
        Collected::StillRunning => (
            StatusCode::OK,
            Json(json!({"has_finished": false, "data": null})),
        ),
        Collected::Finished(TaskOutcome::Success(result)) => (
            StatusCode::OK,
            Json(json!({"has_finished": true, "data": result})),
        ),
        Collected::Finished(TaskOutcome::Failure) => (
            StatusCode::OK,
            Json(json!({"has_finished": true, "error": "Internal Server Error"})),
        ),
    }
}

/// Downloads, processes and uploads one file. The scratch directory is
/// removed when the job ends, successful or not.
async fn run_job(state: &AppState, file: &str) -> anyhow::Result<ProcessResult> {
    tokio::fs::create_dir_all(&state.args.tmp_path).await?;
    let tmp_dir = tempfile::Builder::new()
        .prefix("job-")
        .tempdir_in(&state.args.tmp_path)?;
    let input_path = tmp_dir.path().join("input.pdf");
    let output_path = tmp_dir.path().join("output.pdf");

    state.input_store.download(file, &input_path).await?;

    let options = ProcessOptions {
        confidence_threshold: state.args.confidence_threshold,
        use_aggressive_strategy: state.args.use_aggressive_strategy,
        debug_page: state.args.debug_page.map(|page| page.saturating_sub(1)),
    };
    let result = process(
        &input_path,
        &output_path,
        tmp_dir.path(),
        state.provider.as_ref(),
        &options,
    )
    .await?;

    state
        .output_store
        .upload_pdf(file, &output_path, result.number_of_pages)
        .await?;
    Ok(result)
}
