use std::path::PathBuf;

use clap::Args;

/// Where to find the job's pods.
#[derive(Args, Debug, Clone)]
pub struct KubeArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (in-cluster config or ~/.kube/config when unset)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "POD_NAMESPACE",
        help = "Kubernetes namespace of the job (empty for all namespaces)"
    )]
    pub namespace: Option<String>,

    #[arg(long, env = "ELASTIC_JOB_NAME", help = "Name of the elastic job to observe")]
    pub job_name: String,

    #[arg(
        long,
        default_value = "30",
        help = "Timeout in seconds for a single list or watch-establish call"
    )]
    pub request_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub kube: KubeArgs,

    #[arg(
        long,
        default_value = "290",
        help = "Seconds the API server keeps one watch open before it is resumed"
    )]
    pub watch_timeout_secs: u64,

    #[arg(long, default_value = "500", help = "Initial retry backoff in milliseconds")]
    pub initial_backoff_ms: u64,

    #[arg(long, default_value = "30000", help = "Maximum retry backoff in milliseconds")]
    pub max_backoff_ms: u64,

    #[arg(
        long,
        default_value = "64",
        help = "Node events buffered between the watcher and the output writer"
    )]
    pub channel_capacity: usize,
}
