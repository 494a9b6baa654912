//! Configuration types for gatemix.
//!
//! Everything here is plain serde data loaded from YAML. Model, adapter and
//! quantization settings are carried for the external trainer; gatemix only
//! validates them.

use crate::{GatemixError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Combined configuration for a supervised fine-tuning run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SftConfig {
    /// Base model configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// LoRA adapter configuration.
    #[serde(default)]
    pub lora: LoraConfig,

    /// Quantization of the frozen base weights.
    #[serde(default)]
    pub quantization: QuantizationConfig,

    /// Multi-corpus SFT data.
    #[serde(default)]
    pub data: MixtureConfig,

    /// Constant-length packing for continued pretraining.
    #[serde(default)]
    pub packing: PackingConfig,
}

impl SftConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.lora.validate()?;
        self.quantization.validate()?;
        self.data.validate()?;
        self.packing.validate()?;
        Ok(())
    }
}

/// Model loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (HuggingFace repo ID or local path).
    pub model_id: String,

    /// Tokenizer identifier, when it differs from the model.
    #[serde(default)]
    pub tokenizer_id: Option<String>,

    /// Revision/branch to use.
    #[serde(default)]
    pub revision: Option<String>,

    /// Use flash attention (sdpa) instead of eager attention.
    #[serde(default = "default_true")]
    pub use_flash_attention: bool,

    /// Enable gradient checkpointing (disables the KV cache).
    #[serde(default = "default_true")]
    pub gradient_checkpointing: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            tokenizer_id: None,
            revision: None,
            use_flash_attention: true,
            gradient_checkpointing: true,
        }
    }
}

impl ModelConfig {
    /// Identifier used to resolve the tokenizer.
    pub fn tokenizer_source(&self) -> &str {
        self.tokenizer_id.as_deref().unwrap_or(&self.model_id)
    }
}

/// Bias handling mode for LoRA layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoraBias {
    /// Do not train any bias parameters.
    #[default]
    None,
    /// Train all bias parameters.
    All,
    /// Train only bias parameters associated with LoRA layers.
    LoraOnly,
}

/// LoRA configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraConfig {
    /// LoRA rank (r).
    #[serde(default = "default_lora_r")]
    pub r: usize,

    /// LoRA alpha (scaling factor).
    #[serde(default = "default_lora_alpha")]
    pub alpha: f32,

    /// Dropout probability.
    #[serde(default = "default_lora_dropout")]
    pub dropout: f32,

    /// Target modules to apply LoRA to.
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,

    /// Bias handling mode.
    #[serde(default)]
    pub bias: LoraBias,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            r: default_lora_r(),
            alpha: default_lora_alpha(),
            dropout: default_lora_dropout(),
            target_modules: default_target_modules(),
            bias: LoraBias::default(),
        }
    }
}

impl LoraConfig {
    /// Compute the LoRA scaling factor.
    #[must_use]
    pub fn scaling(&self) -> f32 {
        self.alpha / self.r as f32
    }

    /// Parse a comma-separated module list such as `"q_proj,k_proj, v_proj"`.
    pub fn parse_target_modules(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect()
    }

    /// Validate the adapter settings.
    pub fn validate(&self) -> Result<()> {
        if self.r == 0 {
            return Err(GatemixError::Config("lora.r must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GatemixError::Config(format!(
                "lora.dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.target_modules.is_empty() {
            return Err(GatemixError::Config(
                "lora.target_modules must name at least one module".into(),
            ));
        }
        Ok(())
    }
}

/// 4-bit quantization data type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantType {
    /// Normal Float 4-bit.
    #[default]
    Nf4,
    /// Float Point 4-bit.
    Fp4,
}

/// Compute dtype for quantized matmuls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDtype {
    /// IEEE half precision.
    #[default]
    Float16,
    /// Brain float 16.
    Bfloat16,
    /// Full precision.
    Float32,
}

/// Base-weight quantization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Load base weights in 4-bit.
    #[serde(default)]
    pub load_in_4bit: bool,

    /// Load base weights in 8-bit.
    #[serde(default)]
    pub load_in_8bit: bool,

    /// 4-bit data type.
    #[serde(default)]
    pub quant_type: QuantType,

    /// Compute dtype used with 4-bit weights.
    #[serde(default)]
    pub compute_dtype: ComputeDtype,

    /// Quantize the quantization constants as well.
    #[serde(default)]
    pub double_quant: bool,
}

impl QuantizationConfig {
    /// Whether any k-bit loading is requested.
    pub fn is_quantized(&self) -> bool {
        self.load_in_4bit || self.load_in_8bit
    }

    /// Validate the quantization switches.
    pub fn validate(&self) -> Result<()> {
        if self.load_in_4bit && self.load_in_8bit {
            return Err(GatemixError::Config(
                "load_in_4bit and load_in_8bit are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// One source corpus of a multi-corpus mixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Corpus name, used in logs.
    pub name: String,

    /// Train split file, relative to the mixture's data directory.
    pub train_file: String,

    /// Test split file. When absent, `test_ratio` of train is held out.
    #[serde(default)]
    pub test_file: Option<String>,

    /// Fraction of train held out when there is no test file.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f32,

    /// Gate label assigned to every response token of this corpus.
    pub data_index: u32,
}

impl CorpusConfig {
    /// Corpus with separate train and test files.
    pub fn with_splits(name: &str, data_index: u32) -> Self {
        Self {
            name: name.to_string(),
            train_file: format!("{name}-train.jsonl"),
            test_file: Some(format!("{name}-test.jsonl")),
            test_ratio: default_test_ratio(),
            data_index,
        }
    }

    /// Corpus with only a train file; the test split is held out from it.
    pub fn train_only(name: &str, data_index: u32) -> Self {
        Self {
            test_file: None,
            ..Self::with_splits(name, data_index)
        }
    }

    /// Resolve the train file against a data directory.
    pub fn train_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.train_file)
    }

    /// Resolve the test file against a data directory.
    pub fn test_path(&self, data_dir: &Path) -> Option<PathBuf> {
        self.test_file.as_ref().map(|f| data_dir.join(f))
    }
}

/// Multi-corpus SFT data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureConfig {
    /// Directory holding the corpus files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Corpora, in concatenation order.
    #[serde(default = "default_corpora")]
    pub corpora: Vec<CorpusConfig>,

    /// Maximum tokenized example length.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Seed for held-out test splits.
    #[serde(default = "default_seed")]
    pub split_seed: u64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            corpora: default_corpora(),
            max_length: default_max_length(),
            split_seed: default_seed(),
        }
    }
}

impl MixtureConfig {
    /// Validate the mixture.
    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            return Err(GatemixError::Config("data.max_length must be > 0".into()));
        }
        if self.corpora.is_empty() {
            return Err(GatemixError::Config("data.corpora is empty".into()));
        }
        let mut seen = HashSet::new();
        for corpus in &self.corpora {
            if !seen.insert(corpus.data_index) {
                return Err(GatemixError::Config(format!(
                    "duplicate data_index {} (corpus '{}')",
                    corpus.data_index, corpus.name
                )));
            }
            if corpus.test_file.is_none() && !(corpus.test_ratio > 0.0 && corpus.test_ratio < 1.0)
            {
                return Err(GatemixError::Config(format!(
                    "corpus '{}': test_ratio must be in (0, 1), got {}",
                    corpus.name, corpus.test_ratio
                )));
            }
        }
        Ok(())
    }
}

/// Streaming constant-length packing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingConfig {
    /// Tokens per packed chunk.
    #[serde(default = "default_seq_length")]
    pub seq_length: usize,

    /// Number of chunks the text buffer should roughly produce.
    #[serde(default = "default_num_of_sequences")]
    pub num_of_sequences: usize,

    /// Characters per token. Estimated from the data when absent.
    #[serde(default)]
    pub chars_per_token: Option<f64>,

    /// Record field holding the text.
    #[serde(default = "default_content_field")]
    pub content_field: String,

    /// Shuffle chunks within each buffer.
    #[serde(default = "default_true")]
    pub shuffle: bool,

    /// Append EOS after every record.
    #[serde(default = "default_true")]
    pub add_eos_token: bool,

    /// Let the tokenizer insert its special tokens.
    #[serde(default = "default_true")]
    pub add_special_tokens: bool,

    /// Restart the source when it runs out.
    #[serde(default)]
    pub infinite: bool,

    /// Shuffle seed.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Records sampled when estimating characters per token.
    #[serde(default = "default_ratio_samples")]
    pub ratio_samples: usize,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            seq_length: default_seq_length(),
            num_of_sequences: default_num_of_sequences(),
            chars_per_token: None,
            content_field: default_content_field(),
            shuffle: true,
            add_eos_token: true,
            add_special_tokens: true,
            infinite: false,
            seed: default_seed(),
            ratio_samples: default_ratio_samples(),
        }
    }
}

impl PackingConfig {
    /// Characters per token used when nothing was configured or estimated.
    pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.6;

    /// Buffer threshold in characters for a given ratio.
    pub fn max_buffer_size(&self, chars_per_token: f64) -> f64 {
        self.seq_length as f64 * chars_per_token * self.num_of_sequences as f64
    }

    /// Validate the packing settings.
    pub fn validate(&self) -> Result<()> {
        if self.seq_length == 0 {
            return Err(GatemixError::Config("packing.seq_length must be > 0".into()));
        }
        if self.num_of_sequences == 0 {
            return Err(GatemixError::Config(
                "packing.num_of_sequences must be > 0".into(),
            ));
        }
        if let Some(ratio) = self.chars_per_token {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(GatemixError::Config(format!(
                    "packing.chars_per_token must be positive, got {ratio}"
                )));
            }
        }
        if self.content_field.is_empty() {
            return Err(GatemixError::Config("packing.content_field is empty".into()));
        }
        Ok(())
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_lora_r() -> usize {
    64
}
fn default_lora_alpha() -> f32 {
    16.0
}
fn default_lora_dropout() -> f32 {
    0.1
}
fn default_target_modules() -> Vec<String> {
    vec![
        "q_proj".into(),
        "k_proj".into(),
        "v_proj".into(),
        "o_proj".into(),
        "down_proj".into(),
        "up_proj".into(),
        "gate_proj".into(),
    ]
}
fn default_test_ratio() -> f32 {
    0.1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_corpora() -> Vec<CorpusConfig> {
    vec![
        CorpusConfig::with_splits("gsm8k", 0),
        CorpusConfig::train_only("sqlctx", 2),
        CorpusConfig::with_splits("viggo", 1),
    ]
}
fn default_max_length() -> usize {
    512
}
fn default_seed() -> u64 {
    42
}
fn default_seq_length() -> usize {
    1024
}
fn default_num_of_sequences() -> usize {
    1024
}
fn default_content_field() -> String {
    "content".into()
}
fn default_ratio_samples() -> usize {
    400
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SftConfig::default();
        config.validate().unwrap();
        assert_eq!(config.data.corpora.len(), 3);
        assert_eq!(config.packing.seq_length, 1024);
    }

    #[test]
    fn test_default_mixture_order() {
        let names: Vec<_> = default_corpora().into_iter().map(|c| (c.name, c.data_index)).collect();
        assert_eq!(
            names,
            vec![
                ("gsm8k".to_string(), 0),
                ("sqlctx".to_string(), 2),
                ("viggo".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
model:
  model_id: mistralai/Mistral-7B-v0.1
lora:
  r: 8
  target_modules: [q_proj, v_proj]
quantization:
  load_in_4bit: true
  quant_type: nf4
  compute_dtype: bfloat16
packing:
  seq_length: 2048
  infinite: true
"#;
        let config = SftConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.model.model_id, "mistralai/Mistral-7B-v0.1");
        assert_eq!(config.model.tokenizer_source(), "mistralai/Mistral-7B-v0.1");
        assert_eq!(config.lora.r, 8);
        assert_eq!(config.lora.alpha, 16.0);
        assert_eq!(config.quantization.compute_dtype, ComputeDtype::Bfloat16);
        assert!(config.quantization.is_quantized());
        assert_eq!(config.packing.seq_length, 2048);
        assert!(config.packing.infinite);
        assert_eq!(config.packing.content_field, "content");
        assert_eq!(config.data.max_length, 512);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let config = SftConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", config.to_yaml().unwrap()).unwrap();

        let loaded = SftConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded.data.corpora.len(), config.data.corpora.len());
        assert_eq!(loaded.lora.target_modules, config.lora.target_modules);
    }

    #[test]
    fn test_parse_target_modules() {
        assert_eq!(
            LoraConfig::parse_target_modules("q_proj, k_proj,,v_proj "),
            vec!["q_proj", "k_proj", "v_proj"]
        );
    }

    #[test]
    fn test_lora_scaling() {
        let lora = LoraConfig {
            r: 16,
            alpha: 32.0,
            ..Default::default()
        };
        assert_eq!(lora.scaling(), 2.0);
    }

    #[test]
    fn test_conflicting_quantization_rejected() {
        let quant = QuantizationConfig {
            load_in_4bit: true,
            load_in_8bit: true,
            ..Default::default()
        };
        assert!(matches!(quant.validate(), Err(GatemixError::Config(_))));
    }

    #[test]
    fn test_duplicate_data_index_rejected() {
        let mixture = MixtureConfig {
            corpora: vec![
                CorpusConfig::with_splits("a", 0),
                CorpusConfig::with_splits("b", 0),
            ],
            ..Default::default()
        };
        let err = mixture.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate data_index"), "{err}");
    }

    #[test]
    fn test_invalid_packing_rejected() {
        let packing = PackingConfig {
            seq_length: 0,
            ..Default::default()
        };
        assert!(packing.validate().is_err());

        let packing = PackingConfig {
            chars_per_token: Some(0.0),
            ..Default::default()
        };
        assert!(packing.validate().is_err());
    }

    #[test]
    fn test_max_buffer_size() {
        let packing = PackingConfig {
            seq_length: 4,
            num_of_sequences: 10,
            ..Default::default()
        };
        assert_eq!(packing.max_buffer_size(2.5), 100.0);
    }

    #[test]
    fn test_corpus_paths() {
        let corpus = CorpusConfig::train_only("sqlctx", 2);
        let dir = Path::new("/data");
        assert_eq!(corpus.train_path(dir), PathBuf::from("/data/sqlctx-train.jsonl"));
        assert!(corpus.test_path(dir).is_none());
    }
}
