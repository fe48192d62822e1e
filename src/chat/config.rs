//! Configuration types for the chat application.
//!
//! Settings are layered: built-in defaults, then an optional YAML config file,
//! then command-line arguments.  YAML is a superset of JSON, so a JSON config
//! file loads as well.

use std::path::Path;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::pricing::PricingTable;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-latest";
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an expert AI programming assistant. \
     Keep responses short and do not add newlines at the start or end of a response.";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TEMPERATURE: f64 = 1.0;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Command-line arguments for the chatmeter tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: gemini-1.5-pro-latest)", "MODEL")]
    pub model: Option<String>,

    /// System instruction for the conversation.
    #[arrrg(optional, "System instruction for the conversation", "TEXT")]
    pub system: Option<String>,

    /// Path to a YAML config file.
    #[arrrg(optional, "YAML (or JSON) config file", "PATH")]
    pub config: Option<String>,

    /// API key; falls back to the config file, then GEMINI_API_KEY.
    #[arrrg(optional, "Gemini API key (default: $GEMINI_API_KEY)", "KEY")]
    pub api_key: Option<String>,

    /// Per-request timeout.
    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECS")]
    pub timeout: Option<u64>,

    /// Maximum tokens per response.
    #[arrrg(optional, "Max output tokens per response (default: 8192)", "TOKENS")]
    pub max_output_tokens: Option<u32>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// The config file.  Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub model: Option<String>,
    #[serde(alias = "system_instructions")]
    pub system_instruction: Option<String>,
    #[serde(alias = "timeout")]
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub pricing: Option<PricingTable>,
}

impl FileConfig {
    /// Reads a config file.  Failures are [`Error::Config`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                format!("failed to read config file {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| {
            Error::config(
                format!("failed to parse config file {}", path.display()),
                Some(Box::new(e)),
            )
        })
    }
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after layering the
/// config file and command-line arguments over the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: String,

    /// The system instruction installed at ledger slot 0.
    pub system_instruction: String,

    /// Per-request deadline.
    pub timeout: Duration,

    /// Sampling temperature.
    pub temperature: Option<f64>,

    /// Maximum tokens per response.
    pub max_output_tokens: Option<u32>,

    /// Stop sequences supplied on every request.
    pub stop_sequences: Vec<String>,

    /// API key, if configured.
    pub api_key: Option<String>,

    /// Override for the API base URL.
    pub base_url: Option<String>,

    /// Pricing; `None` selects the built-in schedule for the model.
    pub pricing: Option<PricingTable>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_output_tokens: Some(DEFAULT_MAX_OUTPUT_TOKENS),
            stop_sequences: Vec::new(),
            api_key: None,
            base_url: None,
            pricing: None,
            use_color: true,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Sets the stop sequences.
    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences;
        self
    }

    /// Sets the pricing table.
    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// The pricing in effect for the configured model.
    pub fn resolved_pricing(&self) -> PricingTable {
        self.pricing
            .clone()
            .unwrap_or_else(|| PricingTable::for_model(&self.model))
    }

    /// Layers a config file over these settings.
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(instruction) = file.system_instruction {
            self.system_instruction = instruction;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if file.temperature.is_some() {
            self.temperature = file.temperature;
        }
        if file.max_output_tokens.is_some() {
            self.max_output_tokens = file.max_output_tokens;
        }
        if let Some(stop_sequences) = file.stop_sequences {
            self.stop_sequences = stop_sequences;
        }
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if file.base_url.is_some() {
            self.base_url = file.base_url;
        }
        if file.pricing.is_some() {
            self.pricing = file.pricing;
        }
        self
    }

    /// Layers command-line arguments over these settings.  The `config`
    /// argument is not read here; see [`ChatConfig::resolve`].
    pub fn merge_args(mut self, args: &ChatArgs) -> Self {
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if let Some(system) = &args.system {
            self.system_instruction = system.clone();
        }
        if let Some(key) = &args.api_key {
            self.api_key = Some(key.clone());
        }
        if let Some(secs) = args.timeout {
            self.timeout = Duration::from_secs(secs);
        }
        if args.max_output_tokens.is_some() {
            self.max_output_tokens = args.max_output_tokens;
        }
        if args.no_color {
            self.use_color = false;
        }
        self
    }

    /// Resolves defaults, the config file named by `args`, then `args`.
    ///
    /// A config file that cannot be loaded is skipped; its error is returned
    /// alongside the configuration so the caller can warn about it.
    pub fn resolve(args: &ChatArgs) -> (Self, Option<Error>) {
        let mut config = Self::new();
        let mut warning = None;
        if let Some(path) = &args.config {
            match FileConfig::from_file(path) {
                Ok(file) => config = config.merge_file(file),
                Err(err) => warning = Some(err),
            }
        }
        (config.merge_args(args), warning)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        ChatConfig::new().merge_args(&args)
    }
}
