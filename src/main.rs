use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, trace};
use tracing_subscriber::EnvFilter;

use star::cli::Cli;
use star::fat::Fat;
use star::operations;

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_tracing(&cli);

    let primary = match cli.validate() {
        Ok(primary) => primary,
        Err(err) => {
            eprintln!("star: {err}");
            eprintln!(
                "usage: star (-c|-x|-t|-d|-u|-r|-p) [-v[v]] [-f] archive_path [targets...]"
            );
            return ExitCode::FAILURE;
        }
    };

    trace!(?cli, "parsed command line");

    match run(&cli, primary) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "operation failed");
            eprintln!("star: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn install_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity().to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, primary: Option<star::cli::PrimaryOp>) -> anyhow::Result<()> {
    use star::cli::PrimaryOp;

    let create_new = primary == Some(PrimaryOp::Create);
    if create_new {
        operations::ensure_fresh(&cli.archive_path)
            .with_context(|| format!("removing stale archive {}", cli.archive_path.display()))?;
    }
    let mut device = operations::open_device(&cli.archive_path, create_new)
        .with_context(|| format!("opening archive {}", cli.archive_path.display()))?;

    let inputs = if cli.file { cli.targets.clone() } else { Vec::new() };
    let names = cli.target_names();

    let mut fat = if create_new {
        operations::create(&cli.archive_path, &inputs, &mut device).context("creating archive")?
    } else {
        Fat::load(&mut device).context("reading archive header")?
    };

    match primary {
        Some(PrimaryOp::Create) => {}
        Some(PrimaryOp::Extract) => {
            operations::extract(&fat, &mut device).context("extracting archive")?;
        }
        Some(PrimaryOp::Delete) => {
            operations::delete(&mut fat, &mut device, &names).context("deleting files")?;
        }
        Some(PrimaryOp::Update) => {
            operations::update(&mut fat, &mut device, &names).context("updating files")?;
        }
        Some(PrimaryOp::Append) => {
            operations::append(&mut fat, &mut device, &inputs).context("appending files")?;
        }
        None => {}
    }

    if cli.pack {
        operations::defragment(&mut fat, &mut device).context("defragmenting archive")?;
    }

    if cli.list {
        let stdout = std::io::stdout();
        operations::list(&fat, cli.verbose > 0, stdout.lock()).context("listing archive")?;
    }

    Ok(())
}
