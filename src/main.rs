use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use eyre::{Context, Result};
use log::info;

use asyncre::artifact::CycleLayout;
use asyncre::config::Config;
use asyncre::engine::create_engine;
use asyncre::pilot::LocalPilot;
use asyncre::scheduler::{restore_job, Coordinator};
use asyncre::scheme::create_scheme;
use asyncre::setup::setup_job;

/// Asynchronous replica exchange coordinator
#[derive(Debug, Parser)]
#[command(name = "asyncre", version, about)]
struct Cli {
    /// Path to the job control file
    control_file: PathBuf,
}

fn setup_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();

    let config = Config::load(&cli.control_file)
        .with_context(|| format!("failed to load {}", cli.control_file.display()))?;
    setup_logging(config.verbose);

    let jobname = cli
        .control_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asyncre".to_string());
    info!("{} asynchronous replica exchange", jobname);
    info!(
        "started at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("input file: {}", cli.control_file.display());

    // Replica directories live next to the control file
    let root = cli
        .control_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let layout = CycleLayout::new(root, &config.basename);

    let (plugin, nreplicas) = create_scheme(&config, &layout).context("scheme setup failed")?;
    plugin
        .check_input(&config)
        .context("scheme configuration invalid")?;
    let engine = create_engine(&config, &layout).context("engine setup failed")?;
    let pilot = Arc::new(LocalPilot::new(
        config.total_cores,
        config.subjob_cores,
        config.subjobs_buffer_size,
    ));

    let store = if config.re_setup {
        setup_job(&config, &layout, nreplicas).context("campaign setup failed")?
    } else {
        let (store, _actions) = restore_job(&layout, plugin.as_ref(), engine.as_ref())
            .context("restart from checkpoint failed")?;
        if store.len() != nreplicas {
            eyre::bail!(
                "checkpoint has {} replicas, configuration expects {}",
                store.len(),
                nreplicas
            );
        }
        store
    };

    let mut coordinator = Coordinator::new(config, layout, store, pilot, engine, plugin);
    coordinator.run().await.context("scheduling failed")?;

    info!("total run time: {:.1} s", started.elapsed().as_secs_f64());
    Ok(())
}
