use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use tracing::{error, info};

use svcdns::cli::{self, Cli, Commands};
use svcdns::executor::RealCommandExecutor;
use svcdns::graph::RunSummary;

fn report(result: Result<RunSummary>) {
    match result {
        Ok(summary) if summary.success => {
            info!(
                executed = summary.executed.len(),
                skipped = summary.skipped.len(),
                "run completed successfully"
            );
        }
        Ok(summary) => {
            error!(
                failed = summary.failures.len(),
                not_run = summary.not_run.len(),
                "run failed"
            );
            process::exit(1);
        }
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::parse_args();
    svcdns::init_logging(args.command.log_level())?;

    match &args.command {
        Commands::Install(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            report(svcdns::run_install(opts, executor).await);
        }
        Commands::Update(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            report(svcdns::run_update(opts, executor).await);
        }
        Commands::Plan(opts) => match svcdns::run_plan(opts) {
            Ok(order) => {
                for (index, name) in order.iter().enumerate() {
                    println!("{:>2}. {}", index + 1, name);
                }
            }
            Err(e) => {
                error!("{:#}", e);
                process::exit(1);
            }
        },
        Commands::Validate(opts) => {
            if let Err(e) = svcdns::run_validate(opts) {
                error!("{:#}", e);
                process::exit(1);
            }
        }
        Commands::Completions(opts) => {
            let mut command = Cli::command();
            generate(opts.shell, &mut command, env!("CARGO_PKG_NAME"), &mut io::stdout());
        }
    }

    Ok(())
}
