use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use coordmap::cli::{Cli, Command, OutputFormat};
use coordmap::config::Config;
use coordmap::stress::{self, StressReport};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Stress {
            readers,
            writers,
            ops,
            keys,
            format,
        } => {
            let mut stress_config = config.stress.clone();
            if let Some(readers) = readers {
                stress_config.readers = readers;
            }
            if let Some(writers) = writers {
                stress_config.writers = writers;
            }
            if let Some(ops) = ops {
                stress_config.ops_per_thread = ops;
            }
            if let Some(keys) = keys {
                stress_config.key_space = keys;
            }

            let report = stress::run(&stress_config, config.backoff)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_report(&report),
            }

            if !report.passed() {
                return Err(eyre::eyre!("Stress run {} failed protocol checks", report.run_id));
            }
        }
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}

fn print_report(report: &StressReport) {
    let verdict = if report.passed() { "✓ passed".green() } else { "✗ failed".red() };
    println!("Stress run {} {}", report.run_id.cyan(), verdict);
    println!(
        "  Threads: {} readers, {} writers, {} ops each, {} keys",
        report.config.readers, report.config.writers, report.config.ops_per_thread, report.config.key_space
    );
    println!("  Elapsed: {} ms ({} ops)", report.elapsed_ms, report.total_ops());
    println!(
        "  Reads: {} lookups ({} hits), {} membership, {} equality, {} scans",
        report.lookups, report.hits, report.membership_tests, report.equality_tests, report.ordered_scans
    );
    println!(
        "  Writes: {} inserts ({} duplicates), {} sets, {} removes, {} clears",
        report.inserts, report.duplicate_inserts, report.sets, report.removes, report.clears
    );
    println!(
        "  Protocol: {} reader retries, {} violations, {} bad observations",
        report.map.reader_retries,
        report.map.invariant_violations.to_string().yellow(),
        report.bad_observations.to_string().yellow()
    );
    println!("  Final entries: {}", report.map.entries);
}
