use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use node_watcher::config::Cli;
use node_watcher::config::Commands;
use node_watcher::config::KubeArgs;
use node_watcher::config::WatchArgs;
use node_watcher::config::WatcherConfig;
use node_watcher::k8s::KubePodSource;
use node_watcher::NodeWatcher;
use tokio::sync::mpsc;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init();
    tracing::info!("Starting node-watcher {}", &**version::VERSION);

    match cli.command {
        Commands::Snapshot(kube_args) => run_snapshot(kube_args).await,
        Commands::Watch(watch_args) => run_watch(*watch_args).await,
    }
}

async fn build_watcher(
    kube_args: &KubeArgs,
    config: WatcherConfig,
) -> Result<NodeWatcher<KubePodSource>> {
    let source = KubePodSource::connect(kube_args, config.watch_timeout)
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .context("failed to connect to Kubernetes")?;

    NodeWatcher::new(Arc::new(source), kube_args.job_name.clone(), config)
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .context("invalid job name")
}

async fn run_snapshot(kube_args: KubeArgs) -> Result<()> {
    let watcher = build_watcher(&kube_args, WatcherConfig::from(&kube_args)).await?;

    let nodes = watcher
        .list()
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .context("failed to list nodes")?;
    tracing::info!(job = watcher.job_name(), nodes = nodes.len(), "Listed nodes");

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &nodes).context("failed to write nodes")?;
    writeln!(stdout)?;
    Ok(())
}

async fn run_watch(watch_args: WatchArgs) -> Result<()> {
    let config = WatcherConfig::from(&watch_args);
    let watcher = build_watcher(&watch_args.kube, config).await?;

    let (tx, mut rx) = mpsc::channel(watch_args.channel_capacity.max(1));
    let handle = watcher.subscribe(tx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, stopping node watcher");
                handle.cancel();
                break;
            }
            event = rx.recv() => {
                // The watcher dropped its sender, so it has already finished.
                let Some(event) = event else { break };
                let line = serde_json::to_string(&event).context("failed to encode node event")?;
                println!("{line}");
            }
        }
    }

    handle
        .join()
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .context("node watcher failed")
}
