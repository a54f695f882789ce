use crate::calls::media::ChannelProfile;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallManagerConfig {
    /// Application id handed to the media engine.
    pub app_id: String,
    pub channel_profile: ChannelProfile,
    /// How long an outgoing call may ring before it is marked `missed`.
    /// `None` lets it ring until one side acts.
    #[serde(with = "optional_secs")]
    pub ring_timeout: Option<Duration>,
}

impl CallManagerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_ring_forever() {
        let config = CallManagerConfig::from_json("{}").unwrap();
        assert!(config.ring_timeout.is_none());
        assert_eq!(config.channel_profile, ChannelProfile::Communication);
    }

    #[test]
    fn test_parse_full_config() {
        let config = CallManagerConfig::from_json(
            r#"{"app_id": "abc", "channel_profile": "live_broadcasting", "ring_timeout": 45}"#,
        )
        .unwrap();
        assert_eq!(config.app_id, "abc");
        assert_eq!(config.channel_profile, ChannelProfile::LiveBroadcasting);
        assert_eq!(config.ring_timeout, Some(Duration::from_secs(45)));
    }
}
