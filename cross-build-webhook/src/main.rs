use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub(crate) mod admission;
pub(crate) mod cluster;
pub(crate) mod helper;
pub(crate) mod profile;
pub(crate) mod server;

use crate::admission::handler::AdmissionHandler;
use crate::admission::transform::PodTransformer;
use crate::cluster::{Mode, resolve_client};
use crate::profile::Profiles;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),
    #[error("in-cluster config error: {0}")]
    InCluster(#[from] kube::config::InClusterError),
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid architecture profiles: {0}")]
    Profile(#[from] profile::ProfileError),
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Parser)]
#[command(name = "cross-build-webhook")]
#[command(about = "Admission webhook creating cross platform builder pods")]
struct Opts {
    /// `DEV` authenticates with a local kubeconfig, anything else uses the service account
    #[arg(long, env = "MODE")]
    mode: Option<String>,

    #[arg(long, env = "KUBECONFIG_PATH")]
    kubeconfig: Option<PathBuf>,

    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen_addr: SocketAddr,

    #[arg(long, env = "TLS_CERT_PATH", default_value = "img-builder.crt")]
    tls_cert: PathBuf,

    #[arg(long, env = "TLS_KEY_PATH", default_value = "img-builder.key")]
    tls_key: PathBuf,

    /// deadline for creating the companion pod
    #[arg(long, env = "CREATE_TIMEOUT_SECS", default_value_t = 5)]
    create_timeout_secs: u64,

    /// YAML or JSON file replacing the built-in arm64/amd64 profiles
    #[arg(long, env = "PROFILES_PATH")]
    profiles: Option<PathBuf>,
}

async fn run(opts: Opts) -> Result<(), Error> {
    let profiles = match opts.profiles.as_deref() {
        Some(path) => Profiles::from_file(path).await?,
        None => Profiles::default(),
    };

    let mode = Mode::from(opts.mode.as_deref());
    let client = resolve_client(mode, opts.kubeconfig.as_deref()).await?;
    let version = client.apiserver_version().await?;
    tracing::info!({ mode = ?mode, version = &version.git_version }, "connected to cluster");

    let handler = AdmissionHandler::new(
        PodTransformer::new(profiles),
        Arc::new(client),
        Duration::from_secs(opts.create_timeout_secs),
    );

    server::serve(
        opts.listen_addr,
        &opts.tls_cert,
        &opts.tls_key,
        server::router(Arc::new(handler)),
    )
    .await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()?;

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    if let Err(err) = run(opts).await {
        tracing::error!({ err = %err }, "cross-build-webhook failed to start");
        return Err(err);
    }

    Ok(())
}
