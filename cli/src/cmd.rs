mod methods;
mod run;
mod show;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use enum_dispatch::enum_dispatch;

use crate::args::GlobalArgs;

/// Batch automation orchestrator
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    global_args: GlobalArgs,
}

/// Subcommands must implement [`Run`] to be executed at runtime.
#[enum_dispatch]
pub trait Run {
    async fn run(&self, global: &GlobalArgs) -> Result<()>;
}

#[enum_dispatch(Run)]
#[derive(Debug, Subcommand)]
enum Command {
    Run(run::RunCmd),
    Methods(methods::MethodsCmd),
    Show(show::ShowCmd),
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _guard = cli.global_args.init_tracing()?;

    cli.command.run(&cli.global_args).await
}
