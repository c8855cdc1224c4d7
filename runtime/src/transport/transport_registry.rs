use std::collections::{BTreeMap, HashMap};

use refsync_shared::{Endpoint, NetworkError};

use crate::transport::Transport;

/// String arguments handed to a transport factory, such as `bind` or `peer`
/// addresses.
pub type InitArgs = BTreeMap<String, String>;

/// Builds a transport for the local endpoint. The second argument is the
/// peer the channel should reach, if the caller named one.
pub type TransportFactory = Box<
    dyn Fn(&Endpoint, Option<&Endpoint>, &InitArgs) -> Result<Box<dyn Transport>, NetworkError>
        + Send,
>;

/// Channel type token to factory.
#[derive(Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `channel_type`.
    pub fn register(&mut self, channel_type: &str, factory: TransportFactory) {
        self.factories.insert(channel_type.to_string(), factory);
    }

    pub fn is_registered(&self, channel_type: &str) -> bool {
        self.factories.contains_key(channel_type)
    }

    pub fn channel_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn create(
        &self,
        channel_type: &str,
        local: &Endpoint,
        peer: Option<&Endpoint>,
        args: &InitArgs,
    ) -> Result<Box<dyn Transport>, NetworkError> {
        let Some(factory) = self.factories.get(channel_type) else {
            return Err(NetworkError::UnknownChannelType {
                channel_type: channel_type.to_string(),
            });
        };
        factory(local, peer, args)
    }
}

/// Reads a required argument.
pub(crate) fn required_arg<'a>(
    channel_type: &str,
    args: &'a InitArgs,
    key: &str,
) -> Result<&'a str, NetworkError> {
    args.get(key)
        .map(|value| value.as_str())
        .ok_or_else(|| NetworkError::InvalidInitArgument {
            channel_type: channel_type.to_string(),
            key: key.to_string(),
            reason: "missing".to_string(),
        })
}
