use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dbrelay",
    about = "Multi-dialect database connection service with a task-dispatch HTTP/IPC API"
)]
pub struct Cli {
    /// Port for the HTTP API
    #[arg(short = 'p', long, default_value_t = 5000, env = "DBRELAY_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1", env = "DBRELAY_BIND")]
    pub bind: String,

    /// Headless mode: connection credentials come from the config file
    /// instead of per-request messages
    #[arg(long, env = "DBRELAY_HEADLESS")]
    pub headless: bool,

    /// Path to the connection config file (YAML, keyed by session id)
    #[arg(short = 'c', long, env = "DBRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve the IPC channel on stdin/stdout
    #[arg(long, env = "DBRELAY_STDIO_IPC")]
    pub stdio_ipc: bool,
}
