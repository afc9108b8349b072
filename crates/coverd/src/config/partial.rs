use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;
use super::LogLevel;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub integrations: Option<PartialIntegrationsConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Where each merged field was defined, keyed by field path
    #[serde(skip)]
    pub field_locations: HashMap<String, MergeConflictLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub enabled: Option<Spanned<bool>>,
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialIntegrationsConfig {
    pub cover_tilt: Option<PartialCoverTiltConfig>,
    pub demo: Option<PartialDemoConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialCoverTiltConfig {
    pub target_cover_entity_id: Option<Spanned<String>>,
    pub height_control_entity_id: Option<Spanned<String>>,
    pub tilt_control_entity_id: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialDemoConfig {
    #[serde(default)]
    pub covers: HashMap<String, PartialDemoCover>,
    #[serde(default)]
    pub input_booleans: HashMap<String, PartialDemoInputBoolean>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialDemoCover {
    pub name: Option<String>,
    pub supported_features: Option<u32>,
    pub position: Option<Spanned<u8>>,
    pub tilt_position: Option<Spanned<u8>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialDemoInputBoolean {
    pub name: Option<String>,
    pub initial: Option<bool>,
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Each config file is loaded, then its imports are recursively processed.
    /// Cycle detection prevents infinite loops.
    ///
    /// Returns a Vec of all loaded configs in order (imports first, then parent)
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        // Imports first (depth-first), relative to the importing file
        for import_path in &config.imports {
            let import_path_buf = PathBuf::from(import_path);
            let resolved_path = if import_path_buf.is_absolute() {
                import_path_buf
            } else {
                let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
                parent_dir.join(import_path_buf)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Allow the same file to be imported from sibling branches
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.api.is_none()
            && self.integrations.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts (same field defined in multiple configs) are collected as errors
    /// but merging continues to find all conflicts at once.
    ///
    /// Returns (merged, diagnostics) where diagnostics may contain warnings and errors
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut merger = Merger::default();
        let mut result = PartialConfig::default();
        let mut imports = Vec::new();

        for config in configs {
            imports.extend(config.imports.iter().cloned());

            let source_info = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                merger
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source_info.file_path.clone(),
                    }));
            }

            if let Some(logging) = config.logging {
                let into = result.logging.get_or_insert_with(Default::default);
                merger.field(&source_info, "logging.level", &mut into.level, logging.level);

                if let Some(overrides) = logging.overrides {
                    let into_overrides = into.overrides.get_or_insert_with(HashMap::new);
                    for (key, value) in overrides {
                        let field_path = format!("logging.overrides.{}", key);
                        let mut slot = into_overrides.remove(&key);
                        merger.field(&source_info, &field_path, &mut slot, Some(value));
                        if let Some(v) = slot {
                            into_overrides.insert(key, v);
                        }
                    }
                }
            }

            if let Some(api) = config.api {
                let into = result.api.get_or_insert_with(Default::default);
                merger.field(&source_info, "api.enabled", &mut into.enabled, api.enabled);
                merger.field(&source_info, "api.listen", &mut into.listen, api.listen);
                merger.field(&source_info, "api.port", &mut into.port, api.port);
            }

            if let Some(integrations) = config.integrations {
                let into = result.integrations.get_or_insert_with(Default::default);

                if let Some(cover_tilt) = integrations.cover_tilt {
                    let into = into.cover_tilt.get_or_insert_with(Default::default);
                    merger.field(
                        &source_info,
                        "integrations.cover_tilt.target_cover_entity_id",
                        &mut into.target_cover_entity_id,
                        cover_tilt.target_cover_entity_id,
                    );
                    merger.field(
                        &source_info,
                        "integrations.cover_tilt.height_control_entity_id",
                        &mut into.height_control_entity_id,
                        cover_tilt.height_control_entity_id,
                    );
                    merger.field(
                        &source_info,
                        "integrations.cover_tilt.tilt_control_entity_id",
                        &mut into.tilt_control_entity_id,
                        cover_tilt.tilt_control_entity_id,
                    );
                }

                if let Some(demo) = integrations.demo {
                    let into = into.demo.get_or_insert_with(Default::default);
                    merger.entries(
                        &source_info,
                        "integrations.demo.covers",
                        &mut into.covers,
                        demo.covers,
                    );
                    merger.entries(
                        &source_info,
                        "integrations.demo.input_booleans",
                        &mut into.input_booleans,
                        demo.input_booleans,
                    );
                }
            }
        }

        result.imports = imports;
        result.field_locations = merger.first_seen;

        (result, merger.diagnostics)
    }
}

/// Tracks where each merged field was first defined so that later
/// definitions can be reported as conflicts.
#[derive(Default)]
struct Merger {
    first_seen: HashMap<String, MergeConflictLocation>,
    diagnostics: Vec<Diagnostic>,
}

impl Merger {
    /// First-wins merge of a single spanned value.
    fn field<T>(
        &mut self,
        source: &SourceInfo,
        field_path: &str,
        slot: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
    ) {
        let Some(incoming) = incoming else {
            return;
        };
        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span: incoming.span(),
            content: source.content.clone(),
        };
        if self.conflicts(field_path, location) {
            return;
        }
        *slot = Some(incoming);
    }

    /// First-wins merge of named table entries (one table per key).
    fn entries<T>(
        &mut self,
        source: &SourceInfo,
        table_path: &str,
        into: &mut HashMap<String, T>,
        incoming: HashMap<String, T>,
    ) {
        for (key, value) in incoming {
            // Tables carry no span of their own; point at the key instead
            let span = source
                .content
                .find(&key)
                .map(|start| start..(start + key.len()))
                .unwrap_or(0..0);
            let location = MergeConflictLocation {
                file_path: source.file_path.clone(),
                span,
                content: source.content.clone(),
            };
            let field_path = format!("{}.{}", table_path, key);
            if self.conflicts(&field_path, location) {
                continue;
            }
            into.insert(key, value);
        }
    }

    /// Record `location` for `field_path`. Returns true (and records an
    /// error) if the field was already defined.
    fn conflicts(&mut self, field_path: &str, location: MergeConflictLocation) -> bool {
        if let Some(prev) = self.first_seen.get(field_path) {
            self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                field_path: field_path.to_string(),
                message: format!("'{}' defined in multiple config files", field_path),
                conflicts: vec![prev.clone(), location],
            })));
            return true;
        }
        self.first_seen.insert(field_path.to_string(), location);
        false
    }
}
