use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use picsync_core::record::OwnerKey;
use picsync_service::PicsyncService;
use picsync_service::config::ServiceConfig;

mod ledger;

pub use ledger::run_ledger;

fn load_config(config_file: &Path) -> Result<ServiceConfig> {
    let toml_content = std::fs::read_to_string(config_file).with_context(|| {
        format!("could not read config file {config_file:?}, run `picsync config init` first")
    })?;
    toml::from_str(&toml_content).context("could not parse config file")
}

pub async fn run_command(
    config_file: PathBuf,
    local_data_dir: &std::path::Path,
    cmd: crate::Commands,
) -> Result<()> {
    match cmd {
        crate::Commands::Config { cmd } => {
            cmd.run(config_file, local_data_dir)?;
            Ok(())
        }
        crate::Commands::Serve => {
            let config = load_config(&config_file)?;
            picsync_service::run_service(config).await?;
            Ok(())
        }
        _ => {
            let config = load_config(&config_file)?;
            let service = PicsyncService::create(config)?;

            match cmd {
                crate::Commands::Sync {
                    folder,
                    row,
                    column,
                } => {
                    let owner = OwnerKey::new(row, column);
                    let report = service.reconciler().sync(&folder, &owner).await?;
                    println!(
                        "Synced {owner}: {} processed, {} unchanged, {} recovered, {} failed",
                        report.processed, report.unchanged, report.recovered, report.failed
                    );
                    for r in &report.refs {
                        println!("{r}");
                    }
                    Ok(())
                }
                crate::Commands::Sweep => {
                    let summary = service.sweep().await?;
                    println!(
                        "Swept {} rows: {} synced, {} failed",
                        summary.rows, summary.synced, summary.failed
                    );
                    Ok(())
                }
                crate::Commands::Evict { row, column } => {
                    let evicted = match column {
                        Some(column) => {
                            service
                                .reconciler()
                                .evict_owner(&OwnerKey::new(row, column))
                                .await?
                        }
                        None => {
                            let mut total = 0;
                            for watch in &service.config().watch {
                                total += service
                                    .reconciler()
                                    .evict_owner(&OwnerKey::new(
                                        row.clone(),
                                        watch.column.clone(),
                                    ))
                                    .await?;
                            }
                            total
                        }
                    };
                    println!("Evicted {evicted} objects.");
                    Ok(())
                }
                crate::Commands::Ledger { cmd } => run_ledger(cmd, &service).await,
                crate::Commands::Config { .. } | crate::Commands::Serve => unreachable!(),
            }
        }
    }
}
