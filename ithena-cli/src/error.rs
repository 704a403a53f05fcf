//! Errors for the wrapper binary.

#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    /// The wrapped command could not be started at all.
    #[error("failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// A stdio pipe of the child could not be captured after spawn.
    #[error("failed to capture {stream} of command '{command}'")]
    Pipe {
        command: String,
        stream: &'static str,
    },

    /// Waiting on the child process failed.
    #[error("failed to wait for command '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },
}
