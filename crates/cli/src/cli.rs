use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cdp")]
#[command(about = "Connection broker for a remotely debuggable browser")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect (launching a browser if needed) and report session info
    Status,
    /// Capture browser console output for a window of time
    Console {
        /// How long to collect events before reading the buffer
        #[arg(long, default_value_t = 2000, value_name = "MS")]
        wait_ms: u64,
        /// Drain the buffer instead of peeking
        #[arg(long)]
        clear: bool,
    },
    /// Capture completed network requests for a window of time
    Network {
        /// How long to collect events before reading the buffer
        #[arg(long, default_value_t = 2000, value_name = "MS")]
        wait_ms: u64,
        /// Drain the buffer instead of peeking
        #[arg(long)]
        clear: bool,
    },
    /// Tear down any browser owned by this tool and clean up its marker
    Stop,
}
