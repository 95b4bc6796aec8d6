use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Context as _;
use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Error as CrateError;

pub const ARM64_BUILDER_IMAGE: &str = "gcr.io/kaniko-project/executor:arm64-v1.3.0";
pub const AMD64_BUILDER_IMAGE: &str = "gcr.io/kaniko-project/executor:v1.3.0";

const ARCH_NODE_LABEL: &str = "beta.kubernetes.io/arch";
/// taint key applied to the build nodes, spelling has to match the cluster
const ARCH_TAINT_KEY: &str = "node.kubernets.io/arch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Arm64,
    Amd64,
}

impl Arch {
    pub fn opposite(self) -> Self {
        match self {
            Arch::Arm64 => Arch::Amd64,
            Arch::Amd64 => Arch::Arm64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::Amd64 => "amd64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to retarget a builder pod at one architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchProfile {
    pub builder_image: String,
    pub node_selector: BTreeMap<String, String>,
    pub toleration: Toleration,
    /// appended to every `--destination=` argument of a pod retargeted here
    pub destination_suffix: String,
}

impl ArchProfile {
    fn builtin(arch: Arch, builder_image: &str, destination_suffix: &str) -> Self {
        Self {
            builder_image: builder_image.to_string(),
            node_selector: BTreeMap::from([(ARCH_NODE_LABEL.to_string(), arch.to_string())]),
            toleration: Toleration {
                effect: Some("NoSchedule".to_string()),
                key: Some(ARCH_TAINT_KEY.to_string()),
                operator: Some("Equal".to_string()),
                value: Some(arch.to_string()),
                ..Default::default()
            },
            destination_suffix: destination_suffix.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("{0} profile has an empty builder image")]
    EmptyBuilderImage(Arch),
    #[error("arm64 and amd64 profiles share the builder image {0:?}")]
    SharedBuilderImage(String),
}

#[derive(Deserialize)]
struct ProfileTable {
    arm64: ArchProfile,
    amd64: ArchProfile,
}

impl TryFrom<ProfileTable> for Profiles {
    type Error = ProfileError;

    fn try_from(table: ProfileTable) -> Result<Self, Self::Error> {
        Profiles::new(table.arm64, table.amd64)
    }
}

/// The immutable arm64/amd64 profile pair shared by every request.
///
/// A builder image identifies exactly one profile, so the two images are
/// required to differ.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ProfileTable")]
pub struct Profiles {
    arm64: ArchProfile,
    amd64: ArchProfile,
}

impl Default for Profiles {
    fn default() -> Self {
        Self {
            arm64: ArchProfile::builtin(
                Arch::Arm64,
                ARM64_BUILDER_IMAGE,
                "-arm-cross-platform-generated",
            ),
            amd64: ArchProfile::builtin(
                Arch::Amd64,
                AMD64_BUILDER_IMAGE,
                "-x86-cross-platform-generated",
            ),
        }
    }
}

impl Profiles {
    pub fn new(arm64: ArchProfile, amd64: ArchProfile) -> Result<Self, ProfileError> {
        if arm64.builder_image.is_empty() {
            return Err(ProfileError::EmptyBuilderImage(Arch::Arm64));
        }
        if amd64.builder_image.is_empty() {
            return Err(ProfileError::EmptyBuilderImage(Arch::Amd64));
        }
        if arm64.builder_image == amd64.builder_image {
            return Err(ProfileError::SharedBuilderImage(arm64.builder_image));
        }

        Ok(Self { arm64, amd64 })
    }

    /// Reads a profile table from a YAML (or JSON) file with `arm64` and `amd64` keys.
    pub async fn from_file(path: &Path) -> Result<Self, CrateError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read profiles from {path:?}"))?;
        let table: ProfileTable = serde_yaml::from_str(&content)?;
        Ok(Profiles::new(table.arm64, table.amd64)?)
    }

    pub fn get(&self, arch: Arch) -> &ArchProfile {
        match arch {
            Arch::Arm64 => &self.arm64,
            Arch::Amd64 => &self.amd64,
        }
    }

    /// Architecture whose builder image is exactly `image`.
    pub fn arch_of(&self, image: &str) -> Option<Arch> {
        [Arch::Arm64, Arch::Amd64]
            .into_iter()
            .find(|arch| self.get(*arch).builder_image == image)
    }
}
