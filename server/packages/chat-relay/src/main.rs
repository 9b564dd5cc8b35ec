use clap::Parser;

use chat_relay::cli::{self, Cli};

#[tokio::main]
async fn main() {
    cli::init_logging();
    let args = Cli::parse();
    if let Err(err) = cli::run(args).await {
        tracing::error!(error = %err, "chat-relay failed");
        std::process::exit(1);
    }
}
