use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Capabilities reported by the rendering collaborator at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[schemars(title = "Device", inline)]
#[serde(default)]
pub struct DeviceOptions {
    /// Whether device-resident point buffers may be used. When false every
    /// cloud stays CPU-resident and `optimize` never succeeds.
    #[schemars(title = "Device Buffers")]
    pub buffers_available: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            buffers_available: true,
        }
    }
}
