//! Rich diagnostic error types for the lodestone engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the lodestone engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum LodestoneError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Learn(#[from] LearnError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error reading {path}: {source}")]
    #[diagnostic(
        code(lodestone::store::io),
        help(
            "A filesystem operation failed. Check that the dataset file exists \
             and has correct permissions."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset {path}: {message}")]
    #[diagnostic(
        code(lodestone::store::parse),
        help(
            "Dataset files are JSON arrays of instances: \
             [{{\"uri\": \"...\", \"properties\": {{\"name\": [\"value\", ...]}}}}, ...]. \
             Check the file against this shape."
        )
    )]
    Parse { path: String, message: String },

    #[error("duplicate instance URI: {uri}")]
    #[diagnostic(
        code(lodestone::store::duplicate_uri),
        help(
            "Every instance in a store must have a unique URI. \
             Merge the property values of the duplicates into one instance."
        )
    )]
    DuplicateUri { uri: String },
}

// ---------------------------------------------------------------------------
// Link specification errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SpecError {
    #[error("invalid threshold {value}: must be in (0, 1]")]
    #[diagnostic(
        code(lodestone::spec::invalid_threshold),
        help(
            "Thresholds of 0 or below would admit every candidate pair and are \
             rejected up front. Pick a threshold in (0, 1]."
        )
    )]
    InvalidThreshold { value: f64 },

    #[error("failed to parse link specification: {message}")]
    #[diagnostic(
        code(lodestone::spec::parse),
        help(
            "Specifications look like `jaccard(name, label)|0.8` for atoms and \
             `AND(<spec>, <spec>)|0.9` for operators (also OR, MINUS)."
        )
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExecError {
    #[error("unknown similarity measure: {name}")]
    #[diagnostic(
        code(lodestone::exec::unknown_measure),
        help(
            "No measure with this name is registered in the catalog. \
             Built-ins: exact, levenshtein, jaccard, trigram, numeric."
        )
    )]
    UnknownMeasure { name: String },

    #[error("instance {uri} has no property \"{property}\"")]
    #[diagnostic(
        code(lodestone::exec::missing_property),
        help(
            "The atom references a property this instance does not carry. \
             During matching this pair scores 0 and the run continues."
        )
    )]
    MissingProperty { uri: String, property: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Spec(#[from] SpecError),
}

// ---------------------------------------------------------------------------
// Learning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LearnError {
    #[error("invalid learner configuration: {message}")]
    #[diagnostic(
        code(lodestone::learn::configuration),
        help("Check the LearnParams fields. {message}")
    )]
    Configuration { message: String },

    #[error("{algorithm} does not support {mode} learning")]
    #[diagnostic(
        code(lodestone::learn::unsupported_mode),
        help(
            "This learner was invoked in a mode it does not implement. \
             Check `Learner::supports` before dispatching."
        )
    )]
    UnsupportedMode { algorithm: String, mode: String },

    #[error("insufficient diversity: {available} distinct candidate mapping(s), need at least 2")]
    #[diagnostic(
        code(lodestone::learn::insufficient_diversity),
        help(
            "Controversy scoring needs disagreement between at least two distinct \
             specifications. Retry with a larger population or more generations, \
             or skip oracle querying for this round."
        )
    )]
    InsufficientDiversity { available: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Spec(#[from] SpecError),
}

/// Convenience alias for functions returning lodestone results.
pub type LodestoneResult<T> = std::result::Result<T, LodestoneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_error_converts_to_lodestone_error() {
        let err = SpecError::InvalidThreshold { value: -0.5 };
        let top: LodestoneError = err.into();
        assert!(matches!(
            top,
            LodestoneError::Spec(SpecError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn exec_error_wraps_spec_error() {
        let spec_err = SpecError::InvalidThreshold { value: 0.0 };
        let exec_err: ExecError = spec_err.into();
        assert!(matches!(
            exec_err,
            ExecError::Spec(SpecError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = ExecError::MissingProperty {
            uri: "urn:s1".into(),
            property: "name".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("urn:s1"));
        assert!(msg.contains("name"));

        let err = LearnError::InsufficientDiversity { available: 1 };
        assert!(format!("{err}").contains('1'));
    }
}
