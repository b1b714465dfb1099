//! Command handlers for the databrew CLI
//!
//! This module implements the command handlers that connect CLI arguments
//! to the catalog and record functionality.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::app::{DownloadReport, Protocol, Record, TransferOutcome};
use crate::cli::prompt::stdin_confirm;
use crate::cli::signals::run_until_signal;
use crate::cli::{FetchArgs, InitArgs, ListArgs, PathsArgs};
use crate::config::Catalog;
use crate::errors::{AppError, Result};

/// Handle the list command
pub async fn handle_list(catalog_path: Option<PathBuf>, args: ListArgs) -> Result<()> {
    let catalog = Catalog::load(catalog_path).await?;

    if catalog.records.is_empty() {
        println!("No records in catalog");
        if let Some(source) = catalog.source() {
            println!("  Add [records.<name>] tables to {}", source.display());
        }
        return Ok(());
    }

    let width = catalog.record_names().map(str::len).max().unwrap_or(0);
    for (name, record) in &catalog.records {
        let scheme = Protocol::from_url(&record.url)
            .map(|p| p.as_str())
            .unwrap_or("?");
        println!(
            "{:width$}  {:5}  {}",
            name,
            scheme,
            record.description.as_deref().unwrap_or(""),
            width = width
        );

        if args.long {
            let templates = catalog.templates(name)?;
            println!("    remote:    {}", templates.remote);
            println!("    local:     {}", templates.local);
            if let Some(doi) = &record.doi {
                println!("    doi:       {}", doi);
            }
            if !record.variables.is_empty() {
                println!("    variables: {}", record.variables.join(", "));
            }
            for (pipe, data) in &templates.pipelines {
                println!("    pipeline {}: {}", pipe, data);
            }
        }
    }
    Ok(())
}

/// Handle the paths command
pub async fn handle_paths(catalog_path: Option<PathBuf>, args: PathsArgs) -> Result<()> {
    let catalog = Catalog::load(catalog_path).await?;
    let record = catalog.build_record(&args.record)?;

    match &args.pipeline {
        Some(pipeline) => {
            for paths in record.pipeline_paths(pipeline, &args.dates)? {
                println!(
                    "{} -> {} -> {}",
                    paths.remote,
                    paths.local.display(),
                    paths.data.display()
                );
            }
        }
        None => {
            for pair in record.pairs(&args.dates)? {
                println!("{}", pair);
            }
        }
    }
    Ok(())
}

/// Handle the fetch command
///
/// Ctrl+C or SIGTERM cancel the transfers in flight; their partial files
/// are removed before the command exits.
pub async fn handle_fetch(catalog_path: Option<PathBuf>, args: FetchArgs) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let catalog = Catalog::load(catalog_path).await?;
    let mut record = catalog
        .build_record(&args.record)?
        .with_confirm(stdin_confirm());
    apply_overrides(&mut record, &args);
    debug!("Fetching with {:?}", record);

    let selector = args.dates.clone();
    let result = if args.all {
        run_until_signal(async { record.download(&selector).await.map(|_| Vec::new()) }).await
    } else {
        run_until_signal(record.ensure_local(&selector)).await
    };

    let report = record.download_report();
    if args.json {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| AppError::generic(format!("Could not encode report: {}", e)))?;
        println!("{}", json);
    } else {
        print_summary(record.name(), report);
    }

    let paths = result?;
    if !args.json {
        for path in &paths {
            println!("{}", path.display());
        }
    }
    info!("Fetch of {} complete", record.name());
    Ok(())
}

/// Handle the init command
pub async fn handle_init(args: InitArgs) -> Result<()> {
    Catalog::initialize_first_run(args.path).await?;
    Ok(())
}

fn apply_overrides(record: &mut Record, args: &FetchArgs) {
    let settings = record.settings_mut();
    if args.yes {
        settings.auto_download = true;
    }
    if let Some(jobs) = args.jobs {
        settings.jobs = jobs;
    }
    if args.json {
        settings.show_progress = false;
    }
}

fn print_summary(name: &str, report: &DownloadReport) {
    if report.is_empty() {
        return;
    }
    println!("\n📊 {} Summary:", name);
    println!("  Downloaded:        {}", report.count(TransferOutcome::Downloaded));
    println!("  Already local:     {}", report.count(TransferOutcome::LocalExists));
    println!("  Missing on remote: {}", report.count(TransferOutcome::RemoteMissing));
    println!("  Time:              {:.1?}", report.duration());
    for remote in report.remotes(TransferOutcome::RemoteMissing) {
        println!("    • {}", remote);
    }
    println!();
}
