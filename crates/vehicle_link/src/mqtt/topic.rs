/// Inbound broker topics carrying data for one vehicle.
pub fn topics_for_vehicle(vin: &str) -> [String; 3] {
    [
        format!("/mobile/{}/push", vin),
        format!("monitoring/server/{}/push", vin),
        format!("/server/{}/remctrl", vin),
    ]
}

/// Outbound heartbeat topic for one vehicle.
pub fn heartbeat_topic(vin: &str) -> String {
    format!("/vehicles/{}/push/connected/heartbeat", vin)
}

/// Extract the vehicle identifier from an inbound topic.
///
/// Returns `None` for topics that carry no vehicle scope; such messages are
/// still processed against the active vehicle.
pub fn vin_from_topic(topic: &str) -> Option<String> {
    let parts: Vec<&str> = topic.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        return None;
    }

    match parts[0] {
        "mobile" => Some(parts[1].to_string()),
        "monitoring" if parts[1] == "server" && parts.len() >= 3 => Some(parts[2].to_string()),
        "server" => Some(parts[1].to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_cover_all_push_channels() {
        let topics = topics_for_vehicle("VIN123");
        assert_eq!(topics[0], "/mobile/VIN123/push");
        assert_eq!(topics[1], "monitoring/server/VIN123/push");
        assert_eq!(topics[2], "/server/VIN123/remctrl");
    }

    #[test]
    fn test_vin_extraction_per_channel() {
        assert_eq!(vin_from_topic("/mobile/VIN123/push").as_deref(), Some("VIN123"));
        assert_eq!(
            vin_from_topic("monitoring/server/VIN123/push").as_deref(),
            Some("VIN123")
        );
        assert_eq!(
            vin_from_topic("/server/VIN123/remctrl").as_deref(),
            Some("VIN123")
        );
    }

    #[test]
    fn test_unscoped_topics_yield_none() {
        assert_eq!(vin_from_topic("broadcast/notices"), None);
        assert_eq!(vin_from_topic("/mobile"), None);
        assert_eq!(vin_from_topic(""), None);
        assert_eq!(vin_from_topic("monitoring/server"), None);
    }
}
