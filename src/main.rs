use lucefact_fixtures::generator;
use lucefact_fixtures::report;
use lucefact_fixtures::verify;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "lucefact-fixtures",
    about = "Generate placeholder ML model files for Lucefact testing",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the four sample model files (default when no subcommand is given)
    Generate {
        /// Directory to write the fixtures into
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Check previously generated sample model files
    Verify {
        /// Directory containing the fixtures
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let command = args.command.unwrap_or(Commands::Generate {
        output: PathBuf::from("."),
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Generate { output } => {
            info!(?output, "starting generate");
            generator::generate(&output, &mut out)?;
        }
        Commands::Verify { dir } => {
            info!(?dir, "starting verify");
            let checks = verify::verify_dir(&dir)?;
            for check in &checks {
                report::print_check(&mut out, check).context("failed to write report")?;
            }
            out.flush().context("failed to flush stdout")?;
            let failed = checks.iter().filter(|c| !c.passed()).count();
            if failed > 0 {
                bail!("{failed} of {} fixtures failed verification", checks.len());
            }
        }
    }

    Ok(())
}
