use clap::Parser;
use experiment_engine::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Evaluate(args) => cli::evaluate::run(args).await,
        Command::Schedule(args) => cli::schedule::run(args).await,
        Command::Report(args) => cli::report::run(args).await,
        Command::Detail(args) => cli::detail::run(args).await,
        Command::Declare(args) => cli::declare::run(args).await,
    }
}
