use thiserror::Error;

pub type ContainerResult<T> = Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container {name} already exists")]
    AlreadyExists { name: String },

    #[error("container {name} not found")]
    NotFound { name: String },

    #[error("container {name} is running")]
    InvalidLifecycle { name: String },

    #[error("no available ip in subnet {subnet}")]
    NoAvailableIP { subnet: String },

    #[error("namespace operation failed: {message}")]
    NamespaceOp { message: String },

    #[error("link operation failed: {message}")]
    LinkOp { message: String },

    #[error("persistence operation failed: {message}")]
    PersistenceOp { message: String },

    #[error("subprocess {command} exited with status {status}: {stderr}")]
    SubprocessOp {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),

    #[error("{tag} -> {source}")]
    Tagged {
        tag: String,
        #[source]
        source: Box<ContainerError>,
    },
}

impl ContainerError {
    pub fn namespace_op(message: impl Into<String>) -> Self {
        Self::NamespaceOp {
            message: message.into(),
        }
    }

    pub fn link_op(message: impl Into<String>) -> Self {
        Self::LinkOp {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceOp {
            message: message.into(),
        }
    }

    pub fn subprocess(command: &str, status: std::process::ExitStatus, stderr: &[u8]) -> Self {
        Self::SubprocessOp {
            command: command.to_string(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

/// Tags a leaf error with a human-readable phase, building the short
/// prefix-plus-cause chain described for error propagation.
pub trait Context<T> {
    fn context(self, tag: impl Into<String>) -> ContainerResult<T>;
}

impl<T, E> Context<T> for Result<T, E>
where
    E: Into<ContainerError>,
{
    fn context(self, tag: impl Into<String>) -> ContainerResult<T> {
        self.map_err(|e| ContainerError::Tagged {
            tag: tag.into(),
            source: Box::new(e.into()),
        })
    }
}
