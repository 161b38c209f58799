use clap::{Parser, Subcommand};
use previewer::console::commands::{env, project, sweep, CallableTrait};
use previewer::telemetry::{get_subscriber, init_subscriber};

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Sweep {
        #[command(subcommand)]
        command: SweepCommands,
    },
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
}

#[derive(Debug, Subcommand)]
enum SweepCommands {
    /// Retry stuck teardowns and close previews of inactive projects
    Run {},
}

#[derive(Debug, Subcommand)]
enum EnvCommands {
    /// Create or replace a project variable
    Set {
        project_id: i32,
        key: String,
        value: String,
        /// Store encrypted and pass to the platform as a secret
        #[arg(long)]
        secret: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectCommands {
    /// Stop previewing a project and tear down its live previews
    Deactivate { project_id: i32 },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = get_subscriber("previewer-console".into(), "warn".into());
    init_subscriber(subscriber)?;

    let cli = Cli::parse();
    get_command(cli).call()
}

fn get_command(cli: Cli) -> Box<dyn CallableTrait> {
    match cli.command {
        Commands::Sweep { command } => match command {
            SweepCommands::Run {} => Box::new(sweep::RunCommand::new()),
        },
        Commands::Env { command } => match command {
            EnvCommands::Set {
                project_id,
                key,
                value,
                secret,
            } => Box::new(env::SetCommand::new(project_id, key, value, secret)),
        },
        Commands::Project { command } => match command {
            ProjectCommands::Deactivate { project_id } => {
                Box::new(project::DeactivateCommand::new(project_id))
            }
        },
    }
}
