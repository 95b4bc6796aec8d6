use kube::{
    api::{DynamicObject, GroupVersionKind},
    core::admission::AdmissionReview,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub mod handler;
pub mod transform;

pub const LABEL_CROSS_PLATFORM_BUILD: &str = "cross-platform-build";
pub const LABEL_VALUE_ENABLED: &str = "enabled";
pub const LABEL_VALUE_GENERATED: &str = "generated";
pub const ANNOTATION_SOURCE_POD: &str = "cross-platform-build/source-pod";

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("admission request carries no object")]
    Missing,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An admission review with its embedded object held back as raw JSON.
///
/// A broken object must still be answered with a review, so only the
/// envelope is decoded up front.
pub struct RawReview {
    pub review: AdmissionReview<DynamicObject>,
    pub object: Option<Value>,
}

impl RawReview {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_slice(body)?;
        let mut object = None;
        if let Some(request) = value.get_mut("request").and_then(Value::as_object_mut) {
            object = request.remove("object").filter(|object| !object.is_null());
            // never read, and just as able to break the envelope
            request.remove("oldObject");
        }

        Ok(Self {
            review: serde_json::from_value(value)?,
            object,
        })
    }
}

pub fn parse_object<K: DeserializeOwned>(object: Option<Value>) -> Result<K, ObjectError> {
    let object = object.ok_or(ObjectError::Missing)?;
    Ok(serde_json::from_value(object)?)
}

pub trait ResourceGvkExt {
    fn is(kind: &GroupVersionKind) -> bool;
}

impl<K: k8s_openapi::Resource> ResourceGvkExt for K {
    fn is(kind: &GroupVersionKind) -> bool {
        kind.group == K::GROUP && kind.version == K::VERSION && kind.kind == K::KIND
    }
}
