use clap::{Parser, Subcommand};

/// Minimal Linux container runtime.
#[derive(Debug, Parser)]
#[command(name = "minictr", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create and start a new container.
    Run {
        name: String,
        /// Path to the image directory used as the overlay's lower layer.
        image_dir: String,
        /// Entry point and its arguments, run inside the container.
        #[arg(required = true, trailing_var_arg = true)]
        entrypoint: Vec<String>,
    },
    /// Start a previously created (or stopped) container.
    Start { name: String },
    /// Stop a running container.
    Stop { name: String },
    /// Remove a container; refuses if running.
    Rm { name: String },
    /// List known containers and their observed state.
    Ls,
    /// Stop and remove every container, then wipe the runtime root.
    Clear,
    /// Internal re-entry point: plays the child role inside new namespaces.
    #[command(hide = true)]
    Child { name: String },
}
