//! gatemix CLI - data preparation for gated multi-corpus SFT.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use gatemix_core::{LoraConfig, ModelConfig, PackingConfig, SftConfig};
use gatemix_data::{
    create_pretraining_datasets, estimate_chars_per_token_with_progress, load_mixture,
    ConstantLengthDataset, DataCollator, JsonlSource, PackedChunk, ParquetSource, RecordCursor,
    RecordSource, TextEncoder, Tokenizer,
};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "gatemix")]
#[command(author, version, about = "Data preparation for gated multi-corpus fine-tuning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample configuration file
    Init {
        /// Output path for the YAML configuration
        #[arg(short, long, default_value = "gatemix.yaml")]
        output: PathBuf,
    },

    /// Load, tokenize and merge the SFT mixture
    Prepare {
        /// Path to configuration file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Tokenizer (HuggingFace repo ID, tokenizer.json, or directory)
        #[arg(short, long)]
        tokenizer: Option<String>,

        /// Directory for tokenized train.jsonl / test.jsonl
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Size of the preview batch
        #[arg(long, default_value = "4")]
        batch_size: usize,
    },

    /// Estimate the characters-per-token ratio of a dataset
    Ratio {
        /// Dataset path (JSONL or Parquet)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Tokenizer (HuggingFace repo ID, tokenizer.json, or directory)
        #[arg(short, long)]
        tokenizer: String,

        /// Text field of each record
        #[arg(long, default_value = "content")]
        field: String,

        /// Number of records to sample
        #[arg(long, default_value = "400")]
        samples: usize,
    },

    /// Pack a dataset into constant-length chunks
    Pack {
        /// Dataset path (JSONL or Parquet)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Tokenizer (HuggingFace repo ID, tokenizer.json, or directory)
        #[arg(short, long)]
        tokenizer: String,

        /// Text field of each record
        #[arg(long, default_value = "content")]
        field: String,

        /// Tokens per chunk
        #[arg(long, default_value = "1024")]
        seq_length: usize,

        /// Approximate chunks per buffer
        #[arg(long, default_value = "1024")]
        num_of_sequences: usize,

        /// Characters per token (estimated when omitted)
        #[arg(long)]
        chars_per_token: Option<f64>,

        /// Stop after this many chunks
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Build the pretraining pair: an infinite shuffled train packer and
        /// a finite validation packer (requires --max-chunks)
        #[arg(long, requires = "max_chunks")]
        infinite: bool,

        /// Validation dataset for --infinite (defaults to --dataset)
        #[arg(long, requires = "infinite")]
        valid: Option<PathBuf>,

        /// Shuffle chunks within each buffer
        #[arg(long)]
        shuffle: bool,

        /// Do not separate records with EOS
        #[arg(long)]
        no_eos: bool,

        /// Shuffle seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => generate_sample_config(&output),
        Commands::Prepare {
            config,
            tokenizer,
            output,
            batch_size,
        } => run_prepare(&config, tokenizer, output, batch_size).await,
        Commands::Ratio {
            dataset,
            tokenizer,
            field,
            samples,
        } => run_ratio(&dataset, &tokenizer, &field, samples).await,
        Commands::Pack {
            dataset,
            tokenizer,
            field,
            seq_length,
            num_of_sequences,
            chars_per_token,
            max_chunks,
            infinite,
            valid,
            shuffle,
            no_eos,
            seed,
        } => {
            let config = PackingConfig {
                seq_length,
                num_of_sequences,
                chars_per_token,
                content_field: field,
                shuffle,
                add_eos_token: !no_eos,
                infinite: false,
                seed,
                ..Default::default()
            };
            match (infinite, max_chunks) {
                (true, Some(max_chunks)) => {
                    let valid = valid.unwrap_or_else(|| dataset.clone());
                    run_pretraining_pack(&dataset, &valid, &tokenizer, config, max_chunks).await
                }
                _ => run_pack(&dataset, &tokenizer, config, max_chunks).await,
            }
        }
    }
}

/// A record file picked by extension.
enum DatasetFile {
    Jsonl(JsonlSource),
    Parquet(ParquetSource),
}

impl DatasetFile {
    fn open_path(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Dataset not found at {}", path.display());
        }
        let is_parquet = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
        Ok(if is_parquet {
            Self::Parquet(ParquetSource::new(path))
        } else {
            Self::Jsonl(JsonlSource::new(path))
        })
    }
}

impl RecordSource for DatasetFile {
    fn open(&self) -> gatemix_core::Result<RecordCursor<'_>> {
        match self {
            Self::Jsonl(source) => source.open(),
            Self::Parquet(source) => source.open(),
        }
    }
}

/// Resolve and load a tokenizer, downloading it from the Hub if needed.
async fn load_tokenizer(id_or_path: &str, revision: Option<&str>) -> anyhow::Result<Tokenizer> {
    let token = std::env::var("HF_TOKEN").ok();
    let path = gatemix_hub::resolve_tokenizer(id_or_path, revision, token.as_deref()).await?;
    tracing::info!("Loading tokenizer from {}", path.display());
    Ok(Tokenizer::from_file(&path)?)
}

async fn run_prepare(
    config_path: &Path,
    tokenizer: Option<String>,
    output: Option<PathBuf>,
    batch_size: usize,
) -> anyhow::Result<()> {
    let config = SftConfig::from_yaml_file(config_path)?;
    config.validate()?;

    let tokenizer_id = tokenizer.unwrap_or_else(|| config.model.tokenizer_source().to_string());
    if tokenizer_id.is_empty() {
        anyhow::bail!("Tokenizer is required. Use --tokenizer or set model.model_id in the config.");
    }
    let tokenizer = load_tokenizer(&tokenizer_id, config.model.revision.as_deref()).await?;

    let splits = load_mixture(&config.data, &tokenizer)?;

    println!("\n{:<12} {:>6} {:>8} {:>8} {:>12} {:>12}", "corpus", "gate", "train", "test", "tokens", "supervised");
    for stats in &splits.stats {
        println!(
            "{:<12} {:>6} {:>8} {:>8} {:>12} {:>12}",
            stats.name,
            stats.data_index,
            stats.train_examples,
            stats.test_examples,
            stats.train_tokens,
            stats.supervised_tokens
        );
    }
    println!("\nTrain examples: {}", splits.train.len());
    println!("Test examples:  {}", splits.test.len());

    if !splits.train.is_empty() && batch_size > 0 {
        let collator = DataCollator::from_encoder(&tokenizer)?;
        let preview_len = batch_size.min(splits.train.len());
        let batch = collator.collate(&splits.train.examples()[..preview_len])?;
        println!(
            "Preview batch:  input_ids {:?}, labels {:?}, {} attended tokens",
            batch.input_ids.shape(),
            batch.labels.shape(),
            batch.attended_tokens()
        );
    }

    if let Some(dir) = output {
        std::fs::create_dir_all(&dir)?;
        splits.train.write_jsonl(dir.join("train.jsonl"))?;
        splits.test.write_jsonl(dir.join("test.jsonl"))?;
        println!("Tokenized splits written to: {}", dir.display());
    }

    Ok(())
}

async fn run_ratio(
    dataset: &Path,
    tokenizer: &str,
    field: &str,
    samples: usize,
) -> anyhow::Result<()> {
    let source = DatasetFile::open_path(dataset)?;
    let tokenizer = load_tokenizer(tokenizer, None).await?;

    let ratio = estimate_with_progress(&source, &tokenizer, field, samples)?;
    println!("Characters per token: {:.2}", ratio);

    Ok(())
}

fn estimate_with_progress<S, E>(
    source: &S,
    encoder: &E,
    field: &str,
    samples: usize,
) -> anyhow::Result<f64>
where
    S: RecordSource,
    E: TextEncoder,
{
    let progress = ProgressBar::new(samples as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records")?
            .progress_chars("#>-"),
    );

    let ratio = estimate_chars_per_token_with_progress(source, encoder, field, samples, |n| {
        progress.set_position(n as u64)
    });
    progress.finish_and_clear();
    Ok(ratio?)
}

async fn run_pack(
    dataset: &Path,
    tokenizer: &str,
    mut config: PackingConfig,
    max_chunks: Option<usize>,
) -> anyhow::Result<()> {
    let source = DatasetFile::open_path(dataset)?;
    let tokenizer = load_tokenizer(tokenizer, None).await?;

    if config.chars_per_token.is_none() {
        let ratio =
            estimate_with_progress(&source, &tokenizer, &config.content_field, config.ratio_samples)?;
        tracing::info!("The character to token ratio of the dataset is: {:.2}", ratio);
        config.chars_per_token = Some(ratio);
    }

    let seq_length = config.seq_length;
    let packed = ConstantLengthDataset::new(source, tokenizer, config)?;

    let mut chunks = packed.iter();
    drain_chunks(&mut chunks, max_chunks)?;

    let count = chunks.chunks_yielded();
    println!("Chunks:        {}", count);
    println!("Tokens:        {}", count * seq_length);
    println!("Buffers:       {}", chunks.buffers_filled());
    println!("Buffer chars:  {:.0}", packed.max_buffer_size());

    Ok(())
}

/// Pack `max_chunks` chunks from an endless train packer, then make one
/// full pass over the validation packer.
async fn run_pretraining_pack(
    train: &Path,
    valid: &Path,
    tokenizer: &str,
    config: PackingConfig,
    max_chunks: usize,
) -> anyhow::Result<()> {
    let train_source = DatasetFile::open_path(train)?;
    let valid_source = DatasetFile::open_path(valid)?;
    let tokenizer = load_tokenizer(tokenizer, None).await?;

    let (train, valid) =
        create_pretraining_datasets(train_source, valid_source, tokenizer, &config)?;

    let mut train_chunks = train.iter();
    drain_chunks(&mut train_chunks, Some(max_chunks))?;
    let mut valid_chunks = valid.iter();
    drain_chunks(&mut valid_chunks, None)?;

    println!("Chars/token:   {:.2}", train.chars_per_token());
    println!(
        "Train chunks:  {} ({} buffers)",
        train_chunks.chunks_yielded(),
        train_chunks.buffers_filled()
    );
    println!(
        "Valid chunks:  {} ({} buffers)",
        valid_chunks.chunks_yielded(),
        valid_chunks.buffers_filled()
    );
    println!("Tokens/chunk:  {}", config.seq_length);

    Ok(())
}

/// Pull up to `limit` chunks behind a spinner.
fn drain_chunks<I>(chunks: &mut I, limit: Option<usize>) -> anyhow::Result<()>
where
    I: Iterator<Item = gatemix_core::Result<PackedChunk>>,
{
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} chunks")?,
    );

    for chunk in chunks.take(limit.unwrap_or(usize::MAX)) {
        chunk?;
        progress.inc(1);
    }
    progress.finish_and_clear();
    Ok(())
}

/// Generate a sample configuration file.
fn generate_sample_config(output: &Path) -> anyhow::Result<()> {
    let config = SftConfig {
        model: ModelConfig {
            model_id: "meta-llama/Llama-2-7b-hf".to_string(),
            ..Default::default()
        },
        lora: LoraConfig {
            target_modules: LoraConfig::parse_target_modules("q_proj,k_proj,v_proj,o_proj"),
            ..Default::default()
        },
        ..Default::default()
    };

    std::fs::write(output, config.to_yaml()?)?;

    println!("Sample configuration written to: {}", output.display());
    println!("\nYou can edit this file and prepare the mixture with:");
    println!("  gatemix prepare --config {}", output.display());

    Ok(())
}
