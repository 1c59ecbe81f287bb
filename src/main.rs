use clap::Parser;
use switchboard::cli::{self, Cli, Command, ConfigCommand, ToolsCommand};
use switchboard::{logging, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => {
            let config = cli::load(config_path)?;
            logging::init_logging(&config.logging)?;
            for problem in config.validate() {
                tracing::warn!("{}", problem);
            }
            server::serve(config).await?;
        }
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(config_path)?,
        Command::Config(ConfigCommand::Path) => cli::handle_config_path(config_path),
        Command::Tools(ToolsCommand::Convert { to, file }) => {
            cli::handle_tools_convert(to, file.as_deref())?
        }
        Command::Version => cli::handle_version(),
    }

    Ok(())
}
