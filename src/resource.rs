// SPDX-License-Identifier: MIT
//! Static attributes identifying the running checkout process.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

/// Namespace the checkout service is deployed under.
pub const DEFAULT_NAMESPACE: &str = "microservices-demo";
/// Deployment environment used when `RUST_ENV` is not set.
pub const DEFAULT_ENVIRONMENT: &str = "local";

/// Immutable identity of the process, shared by the trace and metric pipelines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDescriptor {
    service_name: String,
    namespace: String,
    environment: String,
    version: String,
}

impl ResourceDescriptor {
    pub fn new(
        service_name: impl Into<String>,
        namespace: impl Into<String>,
        environment: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            namespace: namespace.into(),
            environment: environment.into(),
            version: version.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build the SDK resource. The default detectors still run, so
    /// `OTEL_RESOURCE_ATTRIBUTES` contributes anything not set here.
    pub fn to_resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new("service.namespace", self.namespace.clone()),
                KeyValue::new("service.version", self.version.clone()),
                KeyValue::new("deployment.environment", self.environment.clone()),
            ])
            .build()
    }
}
