//! Endpoint reachability check

use super::HealthCheck;
use crate::endpoint::Endpoint;
use crate::probe::EndpointProbe;
use async_trait::async_trait;
use tracing::{debug, info};

/// Healthy when every configured endpoint answers
pub struct EndpointCheck {
    endpoints: Vec<Endpoint>,
    probe: EndpointProbe,
}

impl EndpointCheck {
    pub fn new(endpoints: Vec<Endpoint>, probe: EndpointProbe) -> Self {
        info!(count = endpoints.len(), "Configured endpoint check");
        Self { endpoints, probe }
    }
}

#[async_trait]
impl HealthCheck for EndpointCheck {
    fn name(&self) -> &'static str {
        "endpoints"
    }

    async fn check(&self) -> bool {
        for endpoint in &self.endpoints {
            match self.probe.probe(endpoint).await {
                Ok(()) => debug!(endpoint = %endpoint, "Endpoint OK"),
                Err(e) => {
                    info!(
                        endpoint = %endpoint,
                        protocol = endpoint.protocol(),
                        error = %e,
                        "Endpoint check failed"
                    );
                    return false;
                }
            }
        }
        true
    }
}
