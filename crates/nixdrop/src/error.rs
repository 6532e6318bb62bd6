use std::path::PathBuf;

/// A failed run, named after the step that failed.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("cannot read config file {}: {source}", .path.display())]
    ReadUserData {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create or select stack: {0}")]
    UpsertStack(#[source] nixdrop_stack::Error),

    #[error("failed to install {plugin} plugin: {source}")]
    InstallPlugin {
        plugin: String,
        #[source]
        source: nixdrop_stack::Error,
    },

    #[error("failed to set stack config: {0}")]
    SetConfig(#[source] nixdrop_stack::Error),

    #[error("failed to refresh the stack: {0}")]
    Refresh(#[source] nixdrop_stack::Error),

    #[error("failed to destroy stack: {0}")]
    Destroy(#[source] nixdrop_stack::Error),

    #[error("failed to bring up the stack: {0}")]
    Up(#[source] nixdrop_stack::Error),

    #[error("stack output {0} is missing or not a string")]
    MissingOutput(&'static str),
}
