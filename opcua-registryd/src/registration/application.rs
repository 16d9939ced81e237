use std::collections::BTreeMap;
use shared::identity::normalize_uri;
use shared::protocol::{DEVICE_TYPE_APPLICATION, TWIN_SCHEMA_VERSION};
use shared::types::ApplicationInfo;
use crate::twin::{Twin, TwinKey};
use super::{LogicalIdentity, Registration};

/// Fields that identify the same application across discoverers and scans.
/// Ownership, disabled state and audit fields are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationKey {
    site_id: Option<String>,
    names: BTreeMap<String, String>,
    product_uri: Option<String>,
    discovery_profile_uri: Option<String>,
    application_uri: String,
}

impl LogicalIdentity for ApplicationInfo {
    type Key = ApplicationKey;

    fn logical_key(&self) -> ApplicationKey {
        let mut names = self.localized_names.clone();
        if let Some(name) = &self.application_name {
            names.insert(self.locale.clone().unwrap_or_default(), name.clone());
        }
        ApplicationKey {
            site_id: self.site_id.clone(),
            names,
            product_uri: self.product_uri.clone(),
            discovery_profile_uri: self.discovery_profile_uri.clone(),
            application_uri: normalize_uri(&self.application_uri),
        }
    }
}

impl Registration for ApplicationInfo {
    const DEVICE_TYPE: &'static str = DEVICE_TYPE_APPLICATION;

    fn to_twin(&self) -> Twin {
        let mut twin = Twin::new(self.application_id.clone(), None);
        let tags = &mut twin.tags;
        tags.set(TwinKey::DeviceType, DEVICE_TYPE_APPLICATION);
        tags.set(TwinKey::SchemaVersion, TWIN_SCHEMA_VERSION);
        tags.set(TwinKey::ApplicationId, &self.application_id);
        tags.set(TwinKey::ApplicationUri, &self.application_uri);
        tags.set(TwinKey::ApplicationUriLC, normalize_uri(&self.application_uri));
        tags.set(TwinKey::ProductUri, &self.product_uri);
        tags.set(TwinKey::ApplicationType, self.application_type);
        tags.set(TwinKey::ApplicationName, &self.application_name);
        tags.set(TwinKey::Locale, &self.locale);
        tags.set(TwinKey::LocalizedNames, &self.localized_names);
        tags.set(TwinKey::DiscoveryProfileUri, &self.discovery_profile_uri);
        tags.set(TwinKey::DiscoveryUrls, &self.discovery_urls);
        tags.set(TwinKey::HostAddresses, &self.host_addresses);
        tags.set(TwinKey::Capabilities, &self.capabilities);
        tags.set(TwinKey::GatewayServerUri, &self.gateway_server_uri);
        tags.set(TwinKey::SiteId, &self.site_id);
        tags.set(TwinKey::DiscovererId, &self.discoverer_id);
        tags.set(TwinKey::NotSeenSince, self.not_seen_since);
        tags.set(TwinKey::Created, &self.created);
        tags.set(TwinKey::Updated, &self.updated);
        twin
    }

    fn from_twin(twin: &Twin) -> Option<Self> {
        if twin.device_type() != Some(DEVICE_TYPE_APPLICATION) {
            return None;
        }
        let tags = &twin.tags;
        Some(ApplicationInfo {
            application_id: twin.id.clone(),
            application_uri: tags.get_str(&TwinKey::ApplicationUri)?.to_string(),
            product_uri: tags.get_as(&TwinKey::ProductUri),
            application_type: tags.get_as(&TwinKey::ApplicationType).unwrap_or_default(),
            application_name: tags.get_as(&TwinKey::ApplicationName),
            locale: tags.get_as(&TwinKey::Locale),
            localized_names: tags.get_as(&TwinKey::LocalizedNames).unwrap_or_default(),
            discovery_profile_uri: tags.get_as(&TwinKey::DiscoveryProfileUri),
            discovery_urls: tags.get_as(&TwinKey::DiscoveryUrls).unwrap_or_default(),
            host_addresses: tags.get_as(&TwinKey::HostAddresses).unwrap_or_default(),
            capabilities: tags.get_as(&TwinKey::Capabilities).unwrap_or_default(),
            gateway_server_uri: tags.get_as(&TwinKey::GatewayServerUri),
            site_id: tags.get_as(&TwinKey::SiteId),
            discoverer_id: tags.get_as(&TwinKey::DiscovererId),
            not_seen_since: tags.get_as(&TwinKey::NotSeenSince),
            created: tags.get_as(&TwinKey::Created),
            updated: tags.get_as(&TwinKey::Updated),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::types::{ApplicationType, RegistryOperation};

    fn test_app() -> ApplicationInfo {
        ApplicationInfo {
            application_id: "uat1".to_string(),
            application_uri: "urn:Plc:1".to_string(),
            product_uri: Some("urn:vendor:plc".to_string()),
            application_type: ApplicationType::Server,
            application_name: Some("Line 1".to_string()),
            locale: Some("en".to_string()),
            discovery_urls: ["opc.tcp://plc:4840".to_string()].into(),
            capabilities: ["DA".to_string()].into(),
            site_id: Some("s1".to_string()),
            discoverer_id: Some("gw_module_disc".to_string()),
            created: Some(RegistryOperation {
                authority_id: "registry".to_string(),
                time: Utc::now(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_twin_round_trip() {
        let app = test_app();
        let twin = app.to_twin();
        assert_eq!(twin.tags.get_str(&TwinKey::ApplicationUriLC), Some("urn:plc:1"));
        assert_eq!(ApplicationInfo::from_twin(&twin), Some(app));
    }

    #[test]
    fn test_from_twin_rejects_other_kinds() {
        let mut twin = test_app().to_twin();
        twin.tags.set(TwinKey::DeviceType, "Endpoint");
        assert!(ApplicationInfo::from_twin(&twin).is_none());

        let mut twin = test_app().to_twin();
        twin.tags.set(TwinKey::ApplicationUri, None::<String>);
        assert!(ApplicationInfo::from_twin(&twin).is_none());
    }

    #[test]
    fn test_logical_key_ignores_ownership() {
        let a = test_app();
        let mut b = test_app();
        b.application_uri = "URN:PLC:1".to_string();
        b.discoverer_id = Some("other".to_string());
        b.not_seen_since = Some(Utc::now());
        b.created = None;
        assert_eq!(a.logical_key(), b.logical_key());

        b.site_id = Some("s2".to_string());
        assert_ne!(a.logical_key(), b.logical_key());
    }

    #[test]
    fn test_patch_for_disable_touches_only_not_seen_since() {
        let app = test_app();
        let stored = app.to_twin();
        let mut disabled = app.clone();
        disabled.not_seen_since = Some(Utc::now());

        let patch = stored.patch_to(&disabled.to_twin());
        let keys: Vec<_> = patch.tags.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["NotSeenSince"]);
    }
}
