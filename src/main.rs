// src/main.rs

use clap::Parser;
use dirsync::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    cli::run(cli).await
}
