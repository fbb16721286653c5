//! Configuration management for the validator
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (validator.toml)
//! - Environment variables (VALIDATOR__*)
//!
//! ## Example config file (validator.toml):
//! ```toml
//! [validator]
//! all_errors = true
//! draft = "draft2020-12"
//! strict = false
//! coerce_types = "array"
//!
//! [cli]
//! schema_dirs = ["./schemas"]
//! output_format = "pretty"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// JSON Schema draft governing `$ref` sibling handling and the default meta-schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Draft {
    #[serde(rename = "draft6", alias = "draft-06")]
    Draft6,
    #[serde(rename = "draft7", alias = "draft-07")]
    Draft7,
    #[default]
    #[serde(rename = "draft2019-09", alias = "draft/2019-09")]
    Draft2019_09,
    #[serde(rename = "draft2020-12", alias = "draft/2020-12")]
    Draft2020_12,
}

impl Draft {
    /// Drafts 6 and 7 ignore every keyword that sits next to `$ref`
    pub fn ref_drops_siblings(self) -> bool {
        matches!(self, Draft::Draft6 | Draft::Draft7)
    }

    /// Canonical meta-schema URI for this draft
    pub fn meta_schema_uri(self) -> &'static str {
        match self {
            Draft::Draft6 => "http://json-schema.org/draft-06/schema",
            Draft::Draft7 => "http://json-schema.org/draft-07/schema",
            Draft::Draft2019_09 => "https://json-schema.org/draft/2019-09/schema",
            Draft::Draft2020_12 => "https://json-schema.org/draft/2020-12/schema",
        }
    }

    /// Detect the draft declared by a `$schema` URI
    pub fn from_schema_uri(uri: &str) -> Option<Self> {
        let trimmed = uri.trim_end_matches('#');
        if trimmed.contains("draft-06") {
            Some(Draft::Draft6)
        } else if trimmed.contains("draft-07") {
            Some(Draft::Draft7)
        } else if trimmed.contains("2019-09") {
            Some(Draft::Draft2019_09)
        } else if trimmed.contains("2020-12") {
            Some(Draft::Draft2020_12)
        } else {
            None
        }
    }
}

impl FromStr for Draft {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "6" | "draft6" | "draft-06" => Ok(Draft::Draft6),
            "7" | "draft7" | "draft-07" => Ok(Draft::Draft7),
            "2019-09" | "draft2019-09" | "draft/2019-09" => Ok(Draft::Draft2019_09),
            "2020-12" | "draft2020-12" | "draft/2020-12" => Ok(Draft::Draft2020_12),
            other => Draft::from_schema_uri(other).ok_or_else(|| format!("unknown draft: {other}")),
        }
    }
}

/// Which built-in format table to register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatMode {
    #[default]
    Full,
    Fast,
    Off,
}

/// `removeAdditional` behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoveAdditional {
    #[default]
    Off,
    /// Remove every property not covered by `properties`/`patternProperties`
    All,
    /// Remove only properties that fail the `additionalProperties` schema
    Failing,
}

/// `useDefaults` behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UseDefaults {
    #[default]
    Off,
    On,
    /// Also replace `null` and empty strings
    Empty,
}

/// `coerceTypes` behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoerceTypes {
    #[default]
    Off,
    On,
    /// Also wrap scalars into one-element arrays
    Array,
}

/// Options recognised by the compiler and the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorOptions {
    /// Accumulate every error instead of stopping at the first
    #[serde(default)]
    pub all_errors: bool,

    /// Splice reference-free `$ref` targets into the call site
    #[serde(default = "default_true")]
    pub inline_refs: bool,

    /// Attach `value`/`expected` to error records
    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_true")]
    pub strict: bool,

    #[serde(default)]
    pub strict_schema: bool,

    #[serde(default)]
    pub strict_numbers: bool,

    #[serde(default)]
    pub strict_required: bool,

    #[serde(default)]
    pub strict_types: bool,

    #[serde(default)]
    pub draft: Draft,

    #[serde(default = "default_true")]
    pub validate_formats: bool,

    #[serde(default)]
    pub format_mode: FormatMode,

    /// Enums longer than this are checked with a loop
    #[serde(default = "default_loop_threshold")]
    pub loop_enum: usize,

    /// `required` lists longer than this are checked with a loop
    #[serde(default = "default_loop_threshold")]
    pub loop_required: usize,

    /// Allow `{"$data": pointer}` keyword arguments
    #[serde(default, alias = "$data")]
    pub data: bool,

    #[serde(default)]
    pub remove_additional: RemoveAdditional,

    #[serde(default)]
    pub use_defaults: UseDefaults,

    #[serde(default)]
    pub coerce_types: CoerceTypes,

    /// Reuse compiled validators by `$id` or schema identity
    #[serde(default = "default_true")]
    pub cache: bool,

    /// Build validators that await async keywords and formats
    #[serde(default, alias = "async")]
    pub async_mode: bool,

    /// Validate the schema against its meta-schema before compiling
    #[serde(default)]
    pub validate_schema: bool,

    /// Register schemas fetched through the loader
    #[serde(default = "default_true")]
    pub add_used_schema: bool,

    /// Honour `errorMessage` in schemas
    #[serde(default)]
    pub error_message: bool,

    #[serde(default)]
    pub allow_format_override: bool,

    /// Meta-schema URI used when a schema has no `$schema`
    #[serde(default)]
    pub meta_schema: Option<String>,
}

/// Settings for the `schema-validate` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directories whose `.json` files are registered before compiling
    #[serde(default)]
    pub schema_dirs: Vec<PathBuf>,

    /// Where to write the JSON report
    #[serde(default)]
    pub report: Option<PathBuf>,

    #[serde(default)]
    pub output_format: OutputFormat,
}

/// Output format for JSON reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

/// Main configuration file layout
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub validator: ValidatorOptions,

    #[serde(default)]
    pub cli: CliConfig,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_loop_threshold() -> usize {
    200
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            all_errors: false,
            inline_refs: true,
            verbose: false,
            strict: true,
            strict_schema: false,
            strict_numbers: false,
            strict_required: false,
            strict_types: false,
            draft: Draft::default(),
            validate_formats: true,
            format_mode: FormatMode::Full,
            loop_enum: default_loop_threshold(),
            loop_required: default_loop_threshold(),
            data: false,
            remove_additional: RemoveAdditional::Off,
            use_defaults: UseDefaults::Off,
            coerce_types: CoerceTypes::Off,
            cache: true,
            async_mode: false,
            validate_schema: false,
            add_used_schema: true,
            error_message: false,
            allow_format_override: false,
            meta_schema: None,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            schema_dirs: Vec::new(),
            report: None,
            output_format: OutputFormat::Pretty,
        }
    }
}

impl ValidatorOptions {
    /// Whether unknown-keyword / incompatible-keyword lints apply
    pub fn lint_schema(&self) -> Option<&'static str> {
        if self.strict_schema {
            Some("strictSchema")
        } else if self.strict {
            Some("strict")
        } else {
            None
        }
    }

    /// Whether data mutation may happen during a run
    pub fn mutates_data(&self) -> bool {
        self.remove_additional != RemoveAdditional::Off
            || self.use_defaults != UseDefaults::Off
            || self.coerce_types != CoerceTypes::Off
    }
}

impl ValidatorConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["validator.toml", ".validator.toml", "config/validator.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "validator") {
            let xdg_config = config_dir.config_dir().join("validator.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // VALIDATOR__VALIDATOR__ALL_ERRORS=true
        builder = builder.add_source(
            Environment::with_prefix("VALIDATOR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ValidatorOptions::default();
        assert!(!options.all_errors);
        assert!(options.inline_refs);
        assert!(options.strict);
        assert_eq!(options.draft, Draft::Draft2019_09);
        assert_eq!(options.loop_enum, 200);
        assert_eq!(options.loop_required, 200);
        assert!(!options.mutates_data());
    }

    #[test]
    fn test_serialize_config() {
        let config = ValidatorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[validator]"));
        assert!(toml_str.contains("draft = \"draft2019-09\""));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: ValidatorConfig = toml::from_str(
            r#"
            [validator]
            all_errors = true
            coerce_types = "array"
            draft = "draft-07"
            "#,
        )
        .unwrap();
        assert!(parsed.validator.all_errors);
        assert_eq!(parsed.validator.coerce_types, CoerceTypes::Array);
        assert_eq!(parsed.validator.draft, Draft::Draft7);
        assert!(parsed.validator.inline_refs);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[validator]\nverbose = true\nloop_enum = 3\n").unwrap();

        let config = ValidatorConfig::load_from(path.to_str()).unwrap();
        assert!(config.validator.verbose);
        assert_eq!(config.validator.loop_enum, 3);
    }

    #[test]
    fn test_draft_parsing() {
        assert_eq!("draft-07".parse::<Draft>().unwrap(), Draft::Draft7);
        assert_eq!(
            "https://json-schema.org/draft/2020-12/schema".parse::<Draft>().unwrap(),
            Draft::Draft2020_12
        );
        assert!("draft-99".parse::<Draft>().is_err());
        assert!(Draft::Draft6.ref_drops_siblings());
        assert!(!Draft::Draft2020_12.ref_drops_siblings());
    }
}
