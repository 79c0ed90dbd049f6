use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use arrtool_core::catalog::{CatalogClient, CatalogClientConfig};
use arrtool_core::config::{AppConfig, SearchCeiling, load_config};
use arrtool_core::executor::{ExecutionReport, ThrottledExecutor};
use arrtool_core::parse::parse_candidates;
use arrtool_core::probe::find_unlinked_files;
use arrtool_core::reconcile::build_actions;
use arrtool_core::runtime::{PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths};
use arrtool_core::throttle;

#[derive(Debug, Parser)]
#[command(
    name = "arrtool",
    version,
    about = "Keeps a hardlinked media library consistent with its Sonarr/Radarr catalogs"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    state_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Log every action without touching the catalog services"
    )]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(
        about = "Find hardlink-deficient files, match them against the catalogs, and replace them under the hourly search ceiling"
    )]
    Run,
    #[command(
        about = "Walk the configured roots and report hardlink-deficient files without contacting any catalog"
    )]
    Probe,
    #[command(about = "Print resolved paths and the persisted throttle window")]
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let context = ResolutionContext::from_process()?;
    let paths = resolve_paths(
        &context,
        &PathOverrides {
            config: cli.config.clone(),
            state_dir: cli.state_dir.clone(),
        },
    );

    match cli.command {
        Commands::Run => run_reconcile(&cli, &paths),
        Commands::Probe => run_probe(&paths),
        Commands::Status => run_status(&paths),
    }
}

fn run_reconcile(cli: &Cli, paths: &ResolvedPaths) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    // Fatal ceilings exit here, before any filesystem or network work.
    let ceiling = SearchCeiling::validate(config.maximum_searches)?;
    let dry_run = cli.dry_run || config.dry_run;
    if dry_run {
        announce_dry_run();
    }

    let now = throttle::unix_now()?;
    let mut executor = ThrottledExecutor::start(&paths.state_db_path, ceiling.get(), dry_run, now);
    let outcome = run_instances(&config, &mut executor);
    executor.finish(&paths.state_db_path);
    let reports = outcome?;

    println!("reconcile run");
    for (name, report) in &reports {
        println!(
            "instance.{name}: dispatched={} skipped_at_ceiling={}",
            report.dispatched, report.skipped_at_ceiling
        );
    }
    println!("search_count: {}", executor.state().search_count);
    println!("dry_run: {dry_run}");
    Ok(())
}

fn run_instances(
    config: &AppConfig,
    executor: &mut ThrottledExecutor,
) -> Result<Vec<(String, ExecutionReport)>> {
    let mut reports = Vec::new();
    for (kind, instance) in config.instances() {
        if instance.paths.is_empty() {
            warn!(instance = %instance.name, "no media roots configured; skipping");
            continue;
        }
        let files = find_unlinked_files(&instance.paths);
        if files.is_empty() {
            info!(instance = %instance.name, "no hardlink-deficient files found");
            continue;
        }
        info!(
            instance = %instance.name,
            files = files.len(),
            "processing hardlink-deficient files"
        );

        let mut client = CatalogClient::new(CatalogClientConfig::new(
            kind,
            &instance.url,
            &instance.api_key()?,
        ))?;
        let actions = build_actions(kind, &files, &instance.match_policy(), &mut client)?;
        let report = executor.run(&mut client, &actions)?;
        reports.push((instance.name.clone(), report));
    }
    Ok(reports)
}

fn run_probe(paths: &ResolvedPaths) -> Result<()> {
    let config = load_config(&paths.config_path)?;
    println!("probe report");
    for (kind, instance) in config.instances() {
        let files = find_unlinked_files(&instance.paths);
        let candidates = parse_candidates(&files);
        println!("instance: {} ({})", instance.name, kind.as_str());
        println!("hardlink_deficient: {}", candidates.len());
        for candidate in &candidates {
            let identity = &candidate.identity;
            println!(
                "  {} => title={} year={} season={} episode={}",
                candidate.path.display(),
                display_opt(identity.title.as_deref()),
                display_opt(identity.year),
                display_opt(identity.season),
                display_opt(identity.episode),
            );
        }
    }
    Ok(())
}

fn run_status(paths: &ResolvedPaths) -> Result<()> {
    let state = throttle::load_state(&paths.state_db_path);
    let now = throttle::unix_now()?;
    let rotated = state.rotated(now);

    println!("runtime status");
    println!(
        "config_path: {} ({})",
        paths.config_path.display(),
        paths.config_source.as_str()
    );
    println!(
        "state_dir: {} ({})",
        paths.state_dir.display(),
        paths.state_source.as_str()
    );
    println!("state_db: {}", paths.state_db_path.display());
    println!("search_count: {}", state.search_count);
    println!("window_start: {}", state.window_start);
    if rotated == state {
        println!(
            "window_seconds_remaining: {}",
            state.seconds_until_rotation(now)
        );
    } else {
        println!("window_seconds_remaining: 0 (lapsed; next run starts a fresh window)");
    }
    Ok(())
}

fn announce_dry_run() {
    info!("****************************************");
    info!("*           Dry run activated          *");
    info!("*        NO CHANGES WILL BE MADE       *");
    info!("****************************************");
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|inner| inner.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}
