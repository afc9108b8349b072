use std::io::Write;
use std::ops::Range;
use std::path::PathBuf;

use ariadne::Color;
use ariadne::Label;
use ariadne::Report;
use ariadne::ReportKind;
use ariadne::Source;

/// A config file's path and text, kept for rendering located diagnostics
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Problems that leave the configuration usable
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },

    /// A demo cover that cannot be positioned or tilted
    NoPositionFeatures {
        entity_id: String,
        supported_features: u32,
    },
}

/// Problems that make the configuration unusable
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// The same field defined in more than one file
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Failures that stop loading before any merging happens
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {}", .path.display(), .error)]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {}", .path.display(), .error)]
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", .path.display(), .cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

fn file_id(path: &std::path::Path) -> String {
    path.to_string_lossy().to_string()
}

/// Render every diagnostic, in order, as human readable text.
///
/// Diagnostics that carry a location are rendered as annotated source
/// snippets with `ariadne`; the rest as a single line.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(warning) => render_warning(warning, &mut output),
            Diagnostic::Error(Error::Merge(merge)) => render_merge(merge, &mut output),
            Diagnostic::Error(Error::Validation(validation)) => {
                render_validation(validation, &mut output)
            }
        }
    }

    String::from_utf8_lossy(&output).to_string()
}

fn render_warning(warning: &Warning, output: &mut Vec<u8>) {
    let line = match warning {
        Warning::EmptyConfig { file_path } => format!(
            "Warning: Config file '{}' is empty and has no effect",
            file_path.display()
        ),
        Warning::NoPositionFeatures {
            entity_id,
            supported_features,
        } => format!(
            "Warning: Demo cover '{}' advertises neither SET_POSITION nor SET_TILT_POSITION \
             (supported_features = {})",
            entity_id, supported_features
        ),
    };
    writeln!(output, "{}", line).ok();
}

fn render_merge(merge: &MergeError, output: &mut Vec<u8>) {
    let Some(first) = merge.conflicts.first() else {
        writeln!(
            output,
            "Merge conflict in field '{}': {}",
            merge.field_path, merge.message
        )
        .ok();
        return;
    };

    let labels = merge.conflicts.iter().enumerate().map(|(idx, conflict)| {
        let (message, color) = if idx == 0 {
            ("first definition here", Color::Red)
        } else {
            ("conflicts with this definition", Color::Yellow)
        };
        Label::new((file_id(&conflict.file_path), conflict.span.clone()))
            .with_message(message)
            .with_color(color)
    });

    // Conflicting definitions usually live in different files
    let cache = ariadne::sources(
        merge
            .conflicts
            .iter()
            .map(|c| (file_id(&c.file_path), c.content.clone())),
    );

    Report::build(
        ReportKind::Error,
        (file_id(&first.file_path), first.span.clone()),
    )
    .with_message(format!("Merge conflict in field '{}'", merge.field_path))
    .with_note(&merge.message)
    .with_labels(labels)
    .finish()
    .write(cache, &mut *output)
    .ok();
}

fn render_validation(validation: &ValidationError, output: &mut Vec<u8>) {
    let located = validation.span.clone().zip(validation.source.as_ref());
    let Some((span, source)) = located else {
        writeln!(
            output,
            "Validation error in '{}': {}",
            validation.field_path, validation.message
        )
        .ok();
        return;
    };

    let id = file_id(&source.file_path);
    Report::build(ReportKind::Error, (id.clone(), span.clone()))
        .with_message(format!("Validation error in '{}'", validation.field_path))
        .with_label(
            Label::new((id.clone(), span))
                .with_message(&validation.message)
                .with_color(Color::Red),
        )
        .finish()
        .write((id, Source::from(&source.content)), &mut *output)
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlocated_diagnostics_render_as_lines() {
        let rendered = format_diagnostics(&[
            Diagnostic::Warning(Warning::EmptyConfig {
                file_path: PathBuf::from("empty.toml"),
            }),
            Diagnostic::Error(Error::Validation(ValidationError {
                field_path: "integrations.cover_tilt.target_cover_entity_id".to_string(),
                message: "target_cover_entity_id is required".to_string(),
                span: None,
                source: None,
            })),
        ]);

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Warning: Config file 'empty.toml' is empty and has no effect",
                "Validation error in 'integrations.cover_tilt.target_cover_entity_id': \
                 target_cover_entity_id is required",
            ]
        );
    }

    #[test]
    fn test_merge_conflict_names_both_files() {
        let first = "[logging]\nlevel = \"info\"\n";
        let second = "[logging]\nlevel = \"debug\"\n";
        let rendered = format_diagnostics(&[Diagnostic::Error(Error::Merge(MergeError {
            field_path: "logging.level".to_string(),
            message: "'logging.level' defined in multiple config files".to_string(),
            conflicts: vec![
                MergeConflictLocation {
                    file_path: PathBuf::from("base.toml"),
                    span: 18..24,
                    content: first.to_string(),
                },
                MergeConflictLocation {
                    file_path: PathBuf::from("extra.toml"),
                    span: 18..25,
                    content: second.to_string(),
                },
            ],
        }))]);

        assert!(rendered.contains("Merge conflict in field 'logging.level'"));
        assert!(rendered.contains("base.toml"));
        assert!(rendered.contains("extra.toml"));
    }
}
