//! Capability store for the standalone host: keeps values in memory and logs
//! every change.

use async_trait::async_trait;
use grott_devices::{CapabilitySink, CapabilityValue, DriverResult, MemoryCapabilitySink};
use tracing::info;

#[derive(Debug, Default)]
pub struct ConsoleSink {
    inner: MemoryCapabilitySink,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &MemoryCapabilitySink {
        &self.inner
    }
}

#[async_trait]
impl CapabilitySink for ConsoleSink {
    async fn has_capability(&self, capability: &str) -> bool {
        self.inner.has_capability(capability).await
    }

    async fn add_capability(&self, capability: &str) -> DriverResult<()> {
        self.inner.add_capability(capability).await
    }

    async fn capability_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.inner.capability_value(capability).await
    }

    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> DriverResult<()> {
        if self.inner.capability_value(capability).await.as_ref() != Some(&value) {
            info!("{} = {}", capability, value);
        }
        self.inner.set_capability_value(capability, value).await
    }
}
