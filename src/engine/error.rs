use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the external-process layer.
///
/// Configuration problems are caught before anything is spawned; a launch
/// failure means the child never started; an execution failure means it ran
/// and returned nonzero; a parse failure means it exited zero but produced
/// unusable output. Nothing here is retried automatically, the outer
/// optimizer owns that decision.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing required parameters: {}", keys.join(", "))]
    MissingParameters { keys: Vec<&'static str> },

    #[error("no command configured for `{name}`")]
    MissingCommand { name: &'static str },

    #[error("command template `{template}` is missing the `{placeholder}` placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },

    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{name}` failed with command `{command}` in {dir} with exit code {code}")]
    Execution {
        name: &'static str,
        command: String,
        dir: PathBuf,
        code: i32,
    },

    #[error("expected marker `{marker}` not found in {path}")]
    MissingMarker {
        marker: &'static str,
        path: PathBuf,
    },

    #[error("{reason}: `{line}`")]
    Parse { reason: String, line: String },

    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] crate::io::orbsg::CodecError),

    #[error(transparent)]
    Grid(#[from] crate::core::grids::GridError),
}
