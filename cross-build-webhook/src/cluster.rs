use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// How cluster credentials are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// service account of the pod the webhook runs in
    InCluster,
    /// local kubeconfig, for running outside the cluster during development
    Dev,
}

impl From<Option<&str>> for Mode {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some("DEV") => Mode::Dev,
            _ => Mode::InCluster,
        }
    }
}

/// Builds a client for `mode`. With [`Mode::Dev`] an explicit `kubeconfig`
/// path wins over the usual `KUBECONFIG` / `~/.kube/config` lookup.
pub async fn resolve_client(mode: Mode, kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let config = match mode {
        Mode::InCluster => Config::incluster()?,
        Mode::Dev => {
            let options = KubeConfigOptions::default();
            match kubeconfig {
                Some(path) => {
                    let kubeconfig = Kubeconfig::read_from(path)?;
                    Config::from_custom_kubeconfig(kubeconfig, &options).await?
                }
                None => Config::from_kubeconfig(&options).await?,
            }
        }
    };

    tracing::debug!({ cluster_url = %config.cluster_url }, "resolved cluster config");

    Ok(Client::try_from(config)?)
}

#[async_trait]
pub trait PodCreator: Send + Sync {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error>;
}

#[async_trait]
impl PodCreator for Client {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error> {
        let api = Api::<Pod>::namespaced(self.clone(), namespace);
        Ok(api.create(&PostParams::default(), pod).await?)
    }
}
