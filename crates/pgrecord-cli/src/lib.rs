mod cli;
mod commands;
mod config;

pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let cmd = cli::parse_args(&args)?;
    match cmd {
        cli::Command::Help(topic) => {
            cli::print_help(topic);
            Ok(())
        }
        cli::Command::Tables(global) => commands::tables(global).await,
        cli::Command::Schema(args) => commands::schema(args).await,
        cli::Command::Find(args) => commands::find(args).await,
        cli::Command::CacheClear(global) => commands::cache_clear(global),
    }
}
