use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    #[default]
    Unknown,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Mobile,
        DeviceType::Tablet,
        DeviceType::Desktop,
        DeviceType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MOBILE_MARKERS: &[&str] = &["mobile", "android", "iphone", "ipod", "blackberry", "windows phone"];

/// Classifies a User-Agent header. Tablets are checked first because iPad and
/// Android tablet agents also match the mobile markers.
pub fn detect_device_type(user_agent: Option<&str>) -> DeviceType {
    let ua = match user_agent.map(str::trim).filter(|ua| !ua.is_empty()) {
        Some(ua) => ua.to_lowercase(),
        None => return DeviceType::Unknown,
    };

    if ua.contains("ipad") || (ua.contains("android") && !ua.contains("mobile")) {
        DeviceType::Tablet
    } else if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}
