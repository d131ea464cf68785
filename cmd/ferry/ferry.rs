mod cli;
mod initializers;

use clap::Parser;

use crate::cli::CLI;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    let guard = initializers::init_tracing(&opts)?;

    let clean = command.run().await?;
    // `exit` skips destructors, flush the log file first.
    drop(guard);
    if !clean {
        std::process::exit(2);
    }
    Ok(())
}
