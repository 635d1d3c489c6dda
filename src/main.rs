mod cli;

use anyhow::Result;
use clap::Parser;

use storycast::core::config::Config;
use storycast::services::workflow::StoryWorkflow;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please check {} or remove it to use defaults.", cli.config.display());
            return Err(e);
        }
    };

    let workflow = StoryWorkflow::from_config(&config).await?;
    cli::run(cli.command, &workflow, &config).await
}
