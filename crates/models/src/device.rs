use super::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DevicePlatform {
    Ios,
    Android,
    Web,
}

impl std::fmt::Display for DevicePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DevicePlatform::Ios => "ios",
            DevicePlatform::Android => "android",
            DevicePlatform::Web => "web",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DevicePlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(DevicePlatform::Ios),
            "android" => Ok(DevicePlatform::Android),
            "web" => Ok(DevicePlatform::Web),
            other => Err(format!("unknown device platform {other:?}")),
        }
    }
}

/// DeviceToken is a push-notification registration. A physical token
/// may move between users (shared device); registration under a new
/// address supersedes the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub token_id: String,
    pub address: Address,
    pub platform: DevicePlatform,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub is_active: bool,
}
