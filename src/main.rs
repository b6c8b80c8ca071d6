use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::error::InquireResult;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod cli;
mod config;
mod index;
mod listing;
mod semantic;
mod service;
mod store;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use index::SweepOutcome;
use service::{ImageSearchService, IndexOptions};

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("IMGSEEK_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }
    let home = my_home()
        .context("Could not determine home directory")?
        .context("Home directory path is empty")?;
    Ok(home.join(".local/share/imgseek"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {wide_msg}")
        .context("invalid progress template")?
        .progress_chars("=> ");
    Ok(ProgressBar::new(0).with_style(style))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)
        .with_context(|| format!("failed to load config from {}", base_path.display()))?;
    let service = Arc::new(ImageSearchService::from_config(config)?);

    match args.command {
        cli::Command::Index { dir, resight } => {
            let cancel = Arc::new(AtomicBool::new(false));
            let handler_flag = cancel.clone();
            ctrlc::set_handler(move || {
                log::warn!("cancelling, finishing the current image first");
                handler_flag.store(true, Ordering::SeqCst);
            })
            .context("Failed to set Ctrl+C handler")?;

            let report = service.index(IndexOptions {
                dir,
                resight,
                cancel: Some(cancel),
                progress: Some(progress_bar()?),
            })?;
            print_json(&report)
        }

        cli::Command::Search {
            text,
            top_k,
            offset,
        } => print_json(&service.search(&text, top_k, offset)?),

        cli::Command::List { offset } => print_json(&service.list_page(offset)?),

        cli::Command::Dedup { yes, key } => {
            let plan = service.plan_dedup(key)?;

            let mut prompt_error = None;
            let outcome = service.apply_dedup(&plan, |plan| {
                if yes {
                    return true;
                }
                for group in &plan.groups {
                    println!("{}: keep {}, remove {:?}", group.key, group.keep, group.remove);
                }
                match inquire::prompt_confirmation(format!(
                    "Remove {} duplicates in {} groups?",
                    plan.removed.len(),
                    plan.groups.len()
                )) {
                    InquireResult::Ok(answer) => answer,
                    InquireResult::Err(err) => {
                        prompt_error = Some(err);
                        false
                    }
                }
            })?;

            if let Some(err) = prompt_error {
                bail!("An error occurred: {}", err);
            }

            match outcome {
                SweepOutcome::NothingToDo => println!("No duplicates found"),
                SweepOutcome::Cancelled => println!("Nothing removed"),
                SweepOutcome::Removed { removed, remaining } => {
                    println!("{removed} duplicates removed, {remaining} entries remain")
                }
            }
            Ok(())
        }

        cli::Command::Serve => web::start_daemon(service),
    }
}
