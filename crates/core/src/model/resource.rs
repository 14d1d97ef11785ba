use serde::{Deserialize, Serialize};

use crate::model::attrs::Attributes;

pub const SERVICE_NAME_KEY: &str = "service.name";
pub const SERVICE_NAMESPACE_KEY: &str = "service.namespace";
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Resource {
    pub id: String,
    pub service_name: String,
    pub service_namespace: String,
}

impl Resource {
    pub fn new(service_name: impl Into<String>, service_namespace: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let service_namespace = service_namespace.into();
        Self {
            id: resource_id(&service_name, &service_namespace),
            service_name,
            service_namespace,
        }
    }

    pub fn from_attributes(attrs: &Attributes) -> Self {
        let lookup = |key: &str| {
            attrs
                .get(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };
        Self::new(lookup(SERVICE_NAME_KEY), lookup(SERVICE_NAMESPACE_KEY))
    }
}

pub fn resource_id(service_name: &str, service_namespace: &str) -> String {
    format!("{service_name}:{service_namespace}")
}
