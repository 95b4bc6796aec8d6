use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt as _;
use thiserror::Error;

use super::{ANNOTATION_SOURCE_POD, LABEL_CROSS_PLATFORM_BUILD, LABEL_VALUE_GENERATED};
use crate::profile::{Arch, Profiles};

const DESTINATION_ARG_PREFIX: &str = "--destination=";
const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Error, PartialEq)]
pub enum Ineligible {
    #[error("pod has no containers")]
    NoContainers,
    #[error("no supported builder image found, image {0:?}")]
    UnsupportedImage(String),
}

/// Builds the companion pod for the opposite architecture of a builder pod.
#[derive(Debug, Clone, Default)]
pub struct PodTransformer {
    profiles: Profiles,
}

impl PodTransformer {
    pub fn new(profiles: Profiles) -> Self {
        Self { profiles }
    }

    /// Only the first container is inspected and carried over.
    pub fn transform(&self, source: &Pod) -> Result<Pod, Ineligible> {
        let spec = source.spec.as_ref().ok_or(Ineligible::NoContainers)?;
        let container = spec.containers.first().ok_or(Ineligible::NoContainers)?;

        let image = container.image.as_deref().unwrap_or_default();
        let target = self
            .profiles
            .arch_of(image)
            .ok_or_else(|| Ineligible::UnsupportedImage(image.to_string()))?
            .opposite();
        let profile = self.profiles.get(target);

        let args = container
            .args
            .as_deref()
            .map(|args| rewrite_destination_args(args, &profile.destination_suffix));

        Ok(Pod {
            metadata: companion_metadata(source, target),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: container.name.clone(),
                    image: Some(profile.builder_image.clone()),
                    args,
                    env: container.env.clone(),
                    volume_mounts: container.volume_mounts.clone(),
                    ..Default::default()
                }],
                restart_policy: spec.restart_policy.clone(),
                volumes: spec.volumes.clone(),
                node_selector: Some(profile.node_selector.clone()),
                tolerations: Some(vec![profile.toleration.clone()]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Appends `suffix` to every `--destination=` argument, all other arguments are kept as is.
pub fn rewrite_destination_args(args: &[String], suffix: &str) -> Vec<String> {
    args.iter()
        .map(|arg| {
            if arg.starts_with(DESTINATION_ARG_PREFIX) {
                format!("{arg}{suffix}")
            } else {
                arg.clone()
            }
        })
        .collect()
}

/// `<base>-<arch>-cross-build`, with `base` cut short to stay within the object name limit.
pub fn companion_name(base: &str, target: Arch) -> String {
    let suffix = format!("-{target}-cross-build");
    let limit = MAX_NAME_LEN - suffix.len();

    let end = base
        .char_indices()
        .map(|(idx, ch)| idx + ch.len_utf8())
        .take_while(|end| *end <= limit)
        .last()
        .unwrap_or(0);
    let base = base[..end].trim_end_matches(['-', '.']);

    format!("{base}{suffix}")
}

fn companion_metadata(source: &Pod, target: Arch) -> ObjectMeta {
    let name = source.metadata.name.as_deref().filter(|name| !name.is_empty());
    let prefix = source
        .metadata
        .generate_name
        .as_deref()
        .filter(|prefix| !prefix.is_empty());

    let (name, generate_name) = match (name, prefix) {
        (Some(name), _) => (Some(companion_name(name, target)), None),
        (None, Some(prefix)) => (None, Some(format!("{prefix}{target}-cross-build-"))),
        (None, None) => (None, Some(format!("cross-build-{target}-"))),
    };

    ObjectMeta {
        name,
        generate_name,
        labels: Some(BTreeMap::from([(
            LABEL_CROSS_PLATFORM_BUILD.to_string(),
            LABEL_VALUE_GENERATED.to_string(),
        )])),
        annotations: Some(BTreeMap::from([(
            ANNOTATION_SOURCE_POD.to_string(),
            source.name_any(),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AMD64_BUILDER_IMAGE, ARM64_BUILDER_IMAGE};
    use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};

    fn builder_pod(name: &str, image: &str, args: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("builds".to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_CROSS_PLATFORM_BUILD.to_string(),
                    "enabled".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "kaniko".to_string(),
                    image: Some(image.to_string()),
                    args: Some(args.iter().map(|arg| arg.to_string()).collect()),
                    env: Some(vec![EnvVar {
                        name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
                        value: Some("/secret/kaniko-secret.json".to_string()),
                        ..Default::default()
                    }]),
                    volume_mounts: Some(vec![VolumeMount {
                        name: "kaniko-secret".to_string(),
                        mount_path: "/secret".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                volumes: Some(vec![Volume {
                    name: "kaniko-secret".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn first_container(pod: &Pod) -> &Container {
        &pod.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn test_amd64_builder_targets_arm64() {
        let transformer = PodTransformer::default();
        let source = builder_pod("build1", AMD64_BUILDER_IMAGE, &["--destination=foo/bar:tag"]);

        let dup = transformer.transform(&source).unwrap();
        let spec = dup.spec.as_ref().unwrap();
        let container = first_container(&dup);

        assert_eq!(container.image.as_deref(), Some(ARM64_BUILDER_IMAGE));
        assert_eq!(
            container.args.as_deref().unwrap(),
            ["--destination=foo/bar:tag-arm-cross-platform-generated"]
        );
        assert_eq!(
            spec.node_selector.as_ref().unwrap().get("beta.kubernetes.io/arch"),
            Some(&"arm64".to_string())
        );
        let tolerations = spec.tolerations.as_ref().unwrap();
        assert!(
            tolerations
                .iter()
                .any(|t| t.value.as_deref() == Some("arm64")
                    && t.effect.as_deref() == Some("NoSchedule"))
        );
    }

    #[test]
    fn test_arm64_builder_targets_amd64() {
        let transformer = PodTransformer::default();
        let source = builder_pod("build1", ARM64_BUILDER_IMAGE, &["--destination=foo/bar:tag"]);

        let dup = transformer.transform(&source).unwrap();
        let spec = dup.spec.as_ref().unwrap();

        assert_eq!(first_container(&dup).image.as_deref(), Some(AMD64_BUILDER_IMAGE));
        assert_eq!(
            first_container(&dup).args.as_deref().unwrap(),
            ["--destination=foo/bar:tag-x86-cross-platform-generated"]
        );
        assert_eq!(
            spec.node_selector.as_ref().unwrap().get("beta.kubernetes.io/arch"),
            Some(&"amd64".to_string())
        );
        assert_eq!(
            spec.tolerations.as_ref().unwrap()[0].value.as_deref(),
            Some("amd64")
        );
    }

    #[test]
    fn test_unsupported_image_is_ineligible() {
        let transformer = PodTransformer::default();
        let source = builder_pod("build1", "nginx:latest", &[]);

        assert_eq!(
            transformer.transform(&source).unwrap_err(),
            Ineligible::UnsupportedImage("nginx:latest".to_string())
        );
    }

    #[test]
    fn test_pod_without_containers_is_ineligible() {
        let transformer = PodTransformer::default();
        let mut source = builder_pod("build1", AMD64_BUILDER_IMAGE, &[]);
        source.spec.as_mut().unwrap().containers.clear();

        assert_eq!(
            transformer.transform(&source).unwrap_err(),
            Ineligible::NoContainers
        );

        source.spec = None;
        assert_eq!(
            transformer.transform(&source).unwrap_err(),
            Ineligible::NoContainers
        );
    }

    #[test]
    fn test_container_fields_copied_verbatim() {
        let transformer = PodTransformer::default();
        let source = builder_pod("build1", AMD64_BUILDER_IMAGE, &[]);

        let dup = transformer.transform(&source).unwrap();
        let src_container = first_container(&source);
        let dup_container = first_container(&dup);
        let src_spec = source.spec.as_ref().unwrap();
        let dup_spec = dup.spec.as_ref().unwrap();

        assert_eq!(dup_container.name, src_container.name);
        assert_eq!(dup_container.env, src_container.env);
        assert_eq!(dup_container.volume_mounts, src_container.volume_mounts);
        assert_eq!(dup_spec.restart_policy, src_spec.restart_policy);
        assert_eq!(dup_spec.volumes, src_spec.volumes);
        assert_eq!(dup_spec.containers.len(), 1);
    }

    #[test]
    fn test_companion_is_not_eligible_itself() {
        let transformer = PodTransformer::default();
        let source = builder_pod("build1", AMD64_BUILDER_IMAGE, &[]);

        let dup = transformer.transform(&source).unwrap();

        assert_eq!(dup.metadata.name.as_deref(), Some("build1-arm64-cross-build"));
        assert_eq!(
            dup.labels().get(LABEL_CROSS_PLATFORM_BUILD),
            Some(&LABEL_VALUE_GENERATED.to_string())
        );
        assert_eq!(
            dup.annotations().get(ANNOTATION_SOURCE_POD),
            Some(&"build1".to_string())
        );
    }

    #[test]
    fn test_transform_is_deterministic() {
        let transformer = PodTransformer::default();
        let source = builder_pod("build1", AMD64_BUILDER_IMAGE, &["--destination=a:b", "--cache"]);

        assert_eq!(
            transformer.transform(&source).unwrap(),
            transformer.transform(&source).unwrap()
        );
    }

    #[test]
    fn test_generate_name_source() {
        let transformer = PodTransformer::default();
        let mut source = builder_pod("build1", ARM64_BUILDER_IMAGE, &[]);
        source.metadata.name = None;
        source.metadata.generate_name = Some("build-".to_string());

        let dup = transformer.transform(&source).unwrap();

        assert_eq!(dup.metadata.name, None);
        assert_eq!(
            dup.metadata.generate_name.as_deref(),
            Some("build-amd64-cross-build-")
        );
    }

    #[test]
    fn test_rewrite_applies_to_every_destination() {
        let args: Vec<String> = [
            "--dockerfile=Dockerfile",
            "--destination=repo/app:1.0",
            "--context=git://example.com/app.git",
            "--destination=repo/app:latest",
        ]
        .map(String::from)
        .to_vec();

        let rewritten = rewrite_destination_args(&args, "-arm");

        assert_eq!(
            rewritten,
            [
                "--dockerfile=Dockerfile",
                "--destination=repo/app:1.0-arm",
                "--context=git://example.com/app.git",
                "--destination=repo/app:latest-arm",
            ]
        );
    }

    #[test]
    fn test_rewrite_requires_prefix() {
        let args: Vec<String> = ["--no-destination=x", " --destination=y", "--destination"]
            .map(String::from)
            .to_vec();

        assert_eq!(rewrite_destination_args(&args, "-arm"), args);
    }

    #[test]
    fn test_rewrite_empty_args() {
        assert!(rewrite_destination_args(&[], "-arm").is_empty());
    }

    #[test]
    fn test_missing_args_stay_missing() {
        let transformer = PodTransformer::default();
        let mut source = builder_pod("build1", AMD64_BUILDER_IMAGE, &[]);
        source.spec.as_mut().unwrap().containers[0].args = None;

        let dup = transformer.transform(&source).unwrap();
        assert_eq!(first_container(&dup).args, None);
    }

    #[test]
    fn test_companion_name_truncated() {
        let base = "a".repeat(300);
        let name = companion_name(&base, Arch::Arm64);

        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with("-arm64-cross-build"));
    }

    #[test]
    fn test_companion_name_trims_separators_at_cut() {
        let suffix_len = "-amd64-cross-build".len();
        let base = format!("{}-{}", "b".repeat(MAX_NAME_LEN - suffix_len - 1), "tail");
        let name = companion_name(&base, Arch::Amd64);

        assert!(!name.contains("--"));
        assert!(name.len() <= MAX_NAME_LEN);
    }
}
