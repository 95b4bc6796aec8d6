use kube::{Resource, ResourceExt as _};

pub trait ResourceExt {
    /// Own namespace, else `fallback`, else `default`.
    fn namespace_any(&self, fallback: Option<&str>) -> String;
    fn label(&self, key: &str) -> Option<&str>;
}

impl<K> ResourceExt for K
where
    K: Resource,
{
    fn namespace_any(&self, fallback: Option<&str>) -> String {
        self.namespace()
            .filter(|ns| !ns.is_empty())
            .or_else(|| fallback.filter(|ns| !ns.is_empty()).map(String::from))
            .unwrap_or_else(|| "default".to_string())
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels().get(key).map(String::as_str)
    }
}
