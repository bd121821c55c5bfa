use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scanblock")]
#[command(about = "Watches new Ethereum blocks and notifies subscribers about matching transactions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Watch {
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long)]
        tasks_buffer: Option<usize>,
        #[arg(long)]
        notify_buffer: Option<usize>,
        #[arg(short, long)]
        subscribers: Option<PathBuf>,
    },
    Search {
        #[arg(short, long)]
        chat_id: i64,
        hash: String,
    },
    History {
        #[arg(short, long)]
        chat_id: i64,
        #[arg(short, long)]
        limit: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}
