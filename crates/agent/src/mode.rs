use std::sync::Arc;

use conduit_core::config::{ChannelConfig, ChannelMode};

use crate::channel::{AgentChannel, ChannelError, DirectChannel, LoopbackRuntimeFactory, RemoteRuntimeClient};

/// Picks the runtime channel once at startup. The choice does not change for
/// the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntegrationMode {
    mode: ChannelMode,
}

impl IntegrationMode {
    pub fn new(mode: ChannelMode) -> Self {
        Self { mode }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.mode)
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn is_direct(&self) -> bool {
        self.mode == ChannelMode::DirectInProcess
    }

    pub fn build_channel(&self, config: &ChannelConfig) -> Result<Arc<dyn AgentChannel>, ChannelError> {
        let channel: Arc<dyn AgentChannel> = match self.mode {
            ChannelMode::Process => Arc::new(RemoteRuntimeClient::from_config(config)?),
            ChannelMode::DirectInProcess => {
                Arc::new(DirectChannel::new(Arc::new(LoopbackRuntimeFactory::from_config(config)?)))
            }
        };
        Ok(channel)
    }
}
