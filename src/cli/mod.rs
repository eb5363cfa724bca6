pub mod add;
pub mod context;
pub mod forget;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use memfabric::config::{EmbeddingConfig, FabricConfig};
use memfabric::fabric::{Attribution, MemoryFabric};

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// `--entity` / `--process` flags shared by the data commands.
#[derive(Debug, Args)]
pub struct ScopeArgs {
    /// Tenant to act for (defaults to `[attribution] entity_id`)
    #[arg(long)]
    pub entity: Option<String>,

    /// Process to act as (defaults to `[attribution] process_id`)
    #[arg(long)]
    pub process: Option<String>,
}

impl ScopeArgs {
    pub fn resolve(&self, fabric: &MemoryFabric) -> Attribution {
        let defaults = fabric.current_attribution();
        Attribution::new(
            self.entity
                .clone()
                .unwrap_or_else(|| defaults.entity_id().to_string()),
            self.process
                .clone()
                .unwrap_or_else(|| defaults.process_id().to_string()),
        )
    }
}

/// Build and initialize a fabric for one CLI command.
pub async fn open_fabric(config: &FabricConfig) -> Result<MemoryFabric> {
    let fabric = MemoryFabric::from_config(config).context("failed to set up memory fabric")?;
    fabric
        .init()
        .await
        .context("failed to initialize memory store")?;
    Ok(fabric)
}

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let cache_dir = memfabric::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading model.onnx (~90MB)...");
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .context("invalid progress template")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
