use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod library;
mod mgf;
mod semantic;
mod spectrum;
#[cfg(test)]
mod tests;
mod web;

use app::{batch::BatchRequest, AppFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Daemon {} => cli::handle_daemon().await,

        cli::Command::Vectorize { spectrum } => cli::handle_vectorize(&spectrum),

        cli::Command::Libraries {} => cli::handle_libraries(AppFactory::create_backend()?).await,

        cli::Command::Entries { library, entry } => {
            cli::handle_entries(AppFactory::create_backend()?, library, entry).await
        }

        cli::Command::Search {
            spectrum,
            broad,
            library,
            top_n,
            fragment,
            tolerance,
            compare,
        } => {
            let opts = cli::SearchOptions {
                broad,
                library,
                top_n,
                fragment,
                tolerance,
                compare,
            };
            cli::handle_search(AppFactory::create_backend()?, &spectrum, opts).await
        }

        cli::Command::Batch {
            mgf,
            broad,
            library,
            top_n,
        } => {
            let request = BatchRequest {
                broad,
                library_id: library,
                top_n,
            };
            cli::handle_batch(AppFactory::create_backend()?, &mgf, request).await
        }

        cli::Command::BuildIndex {} => {
            cli::handle_build_index(AppFactory::create_backend()?).await
        }
    }
}
