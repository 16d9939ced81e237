use shared::identity::{module_id, parse_module_id};
use shared::protocol::{
    DEVICE_TYPE_DISCOVERER, DEVICE_TYPE_GATEWAY, DEVICE_TYPE_PUBLISHER, DEVICE_TYPE_SUPERVISOR,
    TWIN_SCHEMA_VERSION,
};
use shared::types::{DiscovererInfo, GatewayInfo, PublisherInfo, SupervisorInfo};
use crate::twin::{Twin, TwinKey};
use super::Registration;

fn split_id(id: &str) -> (String, Option<String>) {
    let (device, module) = parse_module_id(id);
    (device.to_string(), module.map(str::to_string))
}

fn new_twin(id: &str, device_type: &str) -> Twin {
    let (device, module) = split_id(id);
    let mut twin = Twin::new(device, module);
    twin.tags.set(TwinKey::DeviceType, device_type);
    twin.tags.set(TwinKey::SchemaVersion, TWIN_SCHEMA_VERSION);
    twin
}

fn composite_id(twin: &Twin) -> String {
    module_id(&twin.id, twin.module_id.as_deref())
}

impl Registration for SupervisorInfo {
    const DEVICE_TYPE: &'static str = DEVICE_TYPE_SUPERVISOR;

    fn to_twin(&self) -> Twin {
        let mut twin = new_twin(&self.id, DEVICE_TYPE_SUPERVISOR);
        twin.tags.set(TwinKey::SiteId, &self.site_id);
        twin.reported.set(TwinKey::Connected, self.connected);
        for endpoint_id in &self.activated_endpoints {
            twin.desired.set(TwinKey::ActivatedEndpoint(endpoint_id.clone()), true);
        }
        twin
    }

    fn from_twin(twin: &Twin) -> Option<Self> {
        if twin.device_type() != Some(DEVICE_TYPE_SUPERVISOR) {
            return None;
        }
        let activated_endpoints = twin
            .desired
            .iter()
            .filter(|(_, value)| value.as_bool() == Some(true))
            .filter_map(|(name, _)| TwinKey::activated_endpoint_id(name))
            .map(str::to_string)
            .collect();
        Some(SupervisorInfo {
            id: composite_id(twin),
            site_id: twin.tags.get_as(&TwinKey::SiteId),
            connected: twin.reported.get_as(&TwinKey::Connected),
            activated_endpoints,
        })
    }
}

impl Registration for DiscovererInfo {
    const DEVICE_TYPE: &'static str = DEVICE_TYPE_DISCOVERER;

    fn to_twin(&self) -> Twin {
        let mut twin = new_twin(&self.id, DEVICE_TYPE_DISCOVERER);
        twin.tags.set(TwinKey::SiteId, &self.site_id);
        twin.tags.set(TwinKey::NotSeenSince, self.not_seen_since);
        twin.desired.set(TwinKey::Discovery, self.discovery);
        twin.desired.set(TwinKey::DiscoveryConfig, &self.discovery_config);
        twin.reported.set(TwinKey::Connected, self.connected);
        twin
    }

    fn from_twin(twin: &Twin) -> Option<Self> {
        if twin.device_type() != Some(DEVICE_TYPE_DISCOVERER) {
            return None;
        }
        Some(DiscovererInfo {
            id: composite_id(twin),
            site_id: twin.tags.get_as(&TwinKey::SiteId),
            discovery: twin.desired.get_as(&TwinKey::Discovery).unwrap_or_default(),
            discovery_config: twin.desired.get(&TwinKey::DiscoveryConfig).cloned(),
            connected: twin.reported.get_as(&TwinKey::Connected),
            not_seen_since: twin.tags.get_as(&TwinKey::NotSeenSince),
        })
    }
}

impl Registration for PublisherInfo {
    const DEVICE_TYPE: &'static str = DEVICE_TYPE_PUBLISHER;

    fn to_twin(&self) -> Twin {
        let mut twin = new_twin(&self.id, DEVICE_TYPE_PUBLISHER);
        twin.tags.set(TwinKey::SiteId, &self.site_id);
        twin.desired.set(TwinKey::Configuration, &self.configuration);
        twin.reported.set(TwinKey::Connected, self.connected);
        twin
    }

    fn from_twin(twin: &Twin) -> Option<Self> {
        if twin.device_type() != Some(DEVICE_TYPE_PUBLISHER) {
            return None;
        }
        Some(PublisherInfo {
            id: composite_id(twin),
            site_id: twin.tags.get_as(&TwinKey::SiteId),
            connected: twin.reported.get_as(&TwinKey::Connected),
            configuration: twin.desired.get(&TwinKey::Configuration).cloned(),
        })
    }
}

impl Registration for GatewayInfo {
    const DEVICE_TYPE: &'static str = DEVICE_TYPE_GATEWAY;

    fn to_twin(&self) -> Twin {
        let mut twin = Twin::new(self.id.clone(), None);
        twin.tags.set(TwinKey::DeviceType, DEVICE_TYPE_GATEWAY);
        twin.tags.set(TwinKey::SchemaVersion, TWIN_SCHEMA_VERSION);
        twin.tags.set(TwinKey::SiteId, &self.site_id);
        twin.reported.set(TwinKey::Connected, self.connected);
        twin
    }

    fn from_twin(twin: &Twin) -> Option<Self> {
        if twin.device_type() != Some(DEVICE_TYPE_GATEWAY) || twin.module_id.is_some() {
            return None;
        }
        Some(GatewayInfo {
            id: twin.id.clone(),
            site_id: twin.tags.get_as(&TwinKey::SiteId),
            connected: twin.reported.get_as(&TwinKey::Connected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::types::DiscoveryMode;

    #[test]
    fn test_supervisor_twin_uses_module_id() {
        let supervisor = SupervisorInfo {
            id: "gw1_module_supervisor".to_string(),
            site_id: Some("s1".to_string()),
            connected: Some(true),
            activated_endpoints: ["uep1".to_string(), "uep2".to_string()].into(),
        };
        let twin = supervisor.to_twin();
        assert_eq!(twin.id, "gw1");
        assert_eq!(twin.module_id.as_deref(), Some("supervisor"));
        assert_eq!(SupervisorInfo::from_twin(&twin), Some(supervisor));
    }

    #[test]
    fn test_discoverer_round_trip() {
        let discoverer = DiscovererInfo {
            id: "gw1_module_discoverer".to_string(),
            site_id: Some("s1".to_string()),
            discovery: DiscoveryMode::Fast,
            discovery_config: Some(json!({ "address_ranges": "10.0.0.0/24" })),
            connected: None,
            not_seen_since: None,
        };
        assert_eq!(DiscovererInfo::from_twin(&discoverer.to_twin()), Some(discoverer));
    }

    #[test]
    fn test_gateway_is_device_level() {
        let gateway = GatewayInfo {
            id: "gw1".to_string(),
            site_id: None,
            connected: Some(false),
        };
        let twin = gateway.to_twin();
        assert!(twin.module_id.is_none());
        assert_eq!(GatewayInfo::from_twin(&twin), Some(gateway));
        assert!(PublisherInfo::from_twin(&twin).is_none());
    }
}
