use anyhow::{Context, Result};
use s3trans::{
    config::{AppConfig, EndpointUrl},
    errors::{TransferError, TransferResult},
    services::{
        checkpoint_store::CheckpointStore,
        ignore::IgnoreList,
        orchestrator::{Endpoint, TransferEngine},
    },
    storage::{
        ObjectStore,
        http::HttpSource,
        retrying::RetryingStore,
        s3::{S3Options, S3Store},
    },
};
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting s3trans with config: {:?}", cfg);

    // --- Checkpoint store ---
    let checkpoints = CheckpointStore::open(&cfg.db_path, cfg.transfer.retry)
        .await
        .with_context(|| format!("opening checkpoint database {}", cfg.db_path.display()))?;
    let ignore = IgnoreList::load(&cfg.ignore_list_path).await;

    // --- Run ---
    let outcome = async {
        let from = source_endpoint(&cfg).await?;
        let to = destination_endpoint(&cfg).await?;
        let engine = TransferEngine::new(cfg.transfer.clone(), checkpoints.clone(), ignore)?;
        engine.run(from, to).await
    }
    .await;
    checkpoints.close().await;

    match outcome {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn connect(options: &S3Options, cfg: &AppConfig) -> Arc<dyn ObjectStore> {
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::connect(options).await);
    Arc::new(RetryingStore::new(store, cfg.transfer.retry))
}

fn http_source(cfg: &AppConfig) -> TransferResult<HttpSource> {
    HttpSource::new(cfg.http_timeout, cfg.transfer.retry)
        .map_err(|err| TransferError::FatalConfig(format!("building HTTP client: {}", err)))
}

async fn source_endpoint(cfg: &AppConfig) -> TransferResult<Endpoint> {
    if cfg.url_list {
        let text = tokio::fs::read_to_string(&cfg.from_url)
            .await
            .map_err(|err| {
                TransferError::FatalConfig(format!("reading url list {}: {}", cfg.from_url, err))
            })?;
        let urls = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        return Ok(Endpoint::Http {
            source: http_source(cfg)?,
            urls,
        });
    }

    Ok(match EndpointUrl::parse(&cfg.from_url)? {
        EndpointUrl::S3 { bucket, prefix } => Endpoint::S3 {
            store: connect(&cfg.from, cfg).await,
            bucket,
            prefix,
        },
        EndpointUrl::Local(root) => Endpoint::Local { root },
        EndpointUrl::Http(url) => Endpoint::Http {
            source: http_source(cfg)?,
            urls: vec![url],
        },
    })
}

async fn destination_endpoint(cfg: &AppConfig) -> TransferResult<Endpoint> {
    match EndpointUrl::parse(&cfg.to_url)? {
        EndpointUrl::S3 { bucket, prefix } => Ok(Endpoint::S3 {
            store: connect(&cfg.to, cfg).await,
            bucket,
            prefix,
        }),
        // Checkpoints for local files are keyed by absolute path.
        EndpointUrl::Local(root) => Ok(Endpoint::Local {
            root: std::path::absolute(&root)?,
        }),
        EndpointUrl::Http(url) => Err(TransferError::FatalConfig(format!(
            "cannot write to {}",
            url
        ))),
    }
}
