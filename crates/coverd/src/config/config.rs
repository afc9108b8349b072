use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use super::diagnostics::format_diagnostics;
use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::SourceInfo;
use super::diagnostics::ValidationError;
use super::diagnostics::Warning;
use super::partial::PartialApiConfig;
use super::partial::PartialConfig;
use super::partial::PartialCoverTiltConfig;
use super::partial::PartialDemoConfig;
use crate::integrations::cover_tilt::features::SET_POSITION;
use crate::integrations::cover_tilt::features::SET_TILT_POSITION;
use crate::integrations::cover_tilt::CoverTiltConfig;
use crate::integrations::demo::DemoConfig;
use crate::integrations::demo::DemoCover;
use crate::integrations::demo::DemoInputBoolean;

/// Default port for the HTTP API
pub const DEFAULT_API_PORT: u16 = 8565;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub integrations: IntegrationsConfig,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Per-target filter: `level` by default, `overrides` for matching targets.
    pub fn filter(&self) -> Targets {
        self.overrides
            .iter()
            .fold(Targets::new().with_default(self.level), |targets, (target, level)| {
                targets.with_target(target.clone(), *level)
            })
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub enabled: bool,

    /// Address to listen on
    pub listen: String,

    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1".to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

#[derive(Debug, Default)]
pub struct IntegrationsConfig {
    pub cover_tilt: Option<CoverTiltConfig>,
    pub demo: Option<DemoConfig>,
}

/// Errors that prevent a configuration from being used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Formatted diagnostics, errors and warnings together
    #[error("{0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Supports multiple config files (e.g., base + secrets), import statements
    /// within config files, and conflict detection across all sources. All
    /// errors and warnings are reported together.
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains warnings.
    /// Only returns Err if there are actual errors (not just warnings).
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;

        // Merge with first-wins semantics, collecting diagnostics
        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation diagnostics.
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let locations = &partial.field_locations;

        let logging = if let Some(partial_logging) = partial.logging {
            LoggingConfig {
                level: partial_logging
                    .level
                    .map(|s| *s.get_ref())
                    .unwrap_or_default(),
                overrides: partial_logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            }
        } else {
            LoggingConfig::default()
        };

        let api = partial.api.map(Self::convert_api).unwrap_or_default();

        let mut errors = Vec::new();
        let mut integrations = IntegrationsConfig::default();
        if let Some(partial_integrations) = partial.integrations {
            if let Some(cover_tilt) = partial_integrations.cover_tilt {
                integrations.cover_tilt =
                    Self::validate_cover_tilt(cover_tilt, locations, &mut errors);
            }
            if let Some(demo) = partial_integrations.demo {
                let demo = Self::validate_demo(demo, locations, &mut errors);
                for (entity_id, cover) in &demo.covers {
                    let features = u64::from(cover.supported_features);
                    if features & (SET_POSITION | SET_TILT_POSITION) == 0 {
                        diagnostics.push(Diagnostic::Warning(Warning::NoPositionFeatures {
                            entity_id: entity_id.clone(),
                            supported_features: cover.supported_features,
                        }));
                    }
                }
                integrations.demo = Some(demo);
            }
        }

        diagnostics.extend(
            errors
                .into_iter()
                .map(|e| Diagnostic::Error(Error::Validation(e))),
        );

        let config = Config {
            logging,
            api,
            integrations,
        };

        if let Err(validation_error) = config.validate() {
            diagnostics.push(Diagnostic::Error(Error::Validation(validation_error)));
        }

        let has_errors = diagnostics.iter().any(|d| d.is_error());
        if has_errors {
            Err(ConfigError::Invalid(format_diagnostics(&diagnostics)))
        } else {
            Ok((config, diagnostics))
        }
    }

    fn convert_api(partial: PartialApiConfig) -> ApiConfig {
        let defaults = ApiConfig::default();
        ApiConfig {
            enabled: partial
                .enabled
                .map(Spanned::into_inner)
                .unwrap_or(defaults.enabled),
            listen: partial
                .listen
                .map(Spanned::into_inner)
                .unwrap_or(defaults.listen),
            port: partial
                .port
                .map(Spanned::into_inner)
                .unwrap_or(defaults.port),
        }
    }

    /// All three entity ids are required and must be non-empty.
    fn validate_cover_tilt(
        partial: PartialCoverTiltConfig,
        locations: &HashMap<String, MergeConflictLocation>,
        errors: &mut Vec<ValidationError>,
    ) -> Option<CoverTiltConfig> {
        let mut required = |name: &str, value: Option<Spanned<String>>| -> Option<String> {
            let field_path = format!("integrations.cover_tilt.{}", name);
            let Some(value) = value else {
                errors.push(ValidationError {
                    field_path,
                    message: format!("{} is required", name),
                    span: None,
                    source: None,
                });
                return None;
            };

            if value.get_ref().trim().is_empty() {
                errors.push(ValidationError {
                    message: format!("{} must not be empty", name),
                    span: Some(value.span()),
                    source: source_of(locations, &field_path),
                    field_path,
                });
                return None;
            }

            Some(value.into_inner())
        };

        let target = required("target_cover_entity_id", partial.target_cover_entity_id);
        let height = required("height_control_entity_id", partial.height_control_entity_id);
        let tilt = required("tilt_control_entity_id", partial.tilt_control_entity_id);

        Some(CoverTiltConfig {
            target_cover_entity_id: target?,
            height_control_entity_id: height?,
            tilt_control_entity_id: tilt?,
        })
    }

    fn validate_demo(
        partial: PartialDemoConfig,
        locations: &HashMap<String, MergeConflictLocation>,
        errors: &mut Vec<ValidationError>,
    ) -> DemoConfig {
        let mut covers = BTreeMap::new();
        for (entity_id, cover) in partial.covers {
            let field_path = format!("integrations.demo.covers.{}", entity_id);
            let source = source_of(locations, &field_path);
            let mut valid = true;

            if !entity_id.starts_with("cover.") {
                errors.push(ValidationError {
                    field_path: field_path.clone(),
                    message: format!("'{}' is not a cover entity id", entity_id),
                    span: locations.get(&field_path).map(|l| l.span.clone()),
                    source: source.clone(),
                });
                valid = false;
            }

            let mut percentage = |name: &str, value: &Option<Spanned<u8>>| {
                if let Some(value) = value {
                    if *value.get_ref() > 100 {
                        errors.push(ValidationError {
                            field_path: format!("{}.{}", field_path, name),
                            message: format!("{} must be between 0 and 100", name),
                            span: Some(value.span()),
                            source: source.clone(),
                        });
                        valid = false;
                    }
                }
            };
            percentage("position", &cover.position);
            percentage("tilt_position", &cover.tilt_position);

            if !valid {
                continue;
            }

            let defaults = DemoCover::default();
            covers.insert(
                entity_id,
                DemoCover {
                    name: cover.name,
                    supported_features: cover
                        .supported_features
                        .unwrap_or(defaults.supported_features),
                    position: cover
                        .position
                        .map(Spanned::into_inner)
                        .unwrap_or(defaults.position),
                    tilt_position: cover
                        .tilt_position
                        .map(Spanned::into_inner)
                        .unwrap_or(defaults.tilt_position),
                },
            );
        }

        let mut input_booleans = BTreeMap::new();
        for (entity_id, input_boolean) in partial.input_booleans {
            let field_path = format!("integrations.demo.input_booleans.{}", entity_id);
            if !entity_id.starts_with("input_boolean.") {
                errors.push(ValidationError {
                    message: format!("'{}' is not an input_boolean entity id", entity_id),
                    span: locations.get(&field_path).map(|l| l.span.clone()),
                    source: source_of(locations, &field_path),
                    field_path,
                });
                continue;
            }
            input_booleans.insert(
                entity_id,
                DemoInputBoolean {
                    name: input_boolean.name,
                    initial: input_boolean.initial.unwrap_or(false),
                },
            );
        }

        DemoConfig {
            covers,
            input_booleans,
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api.enabled && self.api.port == 0 {
            return Err(ValidationError {
                field_path: "api.port".to_string(),
                message: "port 0 is not allowed while the API is enabled".to_string(),
                span: None,
                source: None,
            });
        }

        Ok(())
    }
}

fn source_of(
    locations: &HashMap<String, MergeConflictLocation>,
    field_path: &str,
) -> Option<SourceInfo> {
    locations.get(field_path).map(|l| SourceInfo {
        file_path: l.file_path.clone(),
        content: l.content.clone(),
    })
}
