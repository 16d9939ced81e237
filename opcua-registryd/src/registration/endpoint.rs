use shared::identity::normalize_uri;
use shared::protocol::{DEVICE_TYPE_ENDPOINT, TWIN_SCHEMA_VERSION};
use shared::types::{EndpointInfo, SecurityMode};
use crate::twin::{Twin, TwinKey};
use super::{LogicalIdentity, Registration};

/// Endpoints match on URL and security settings; credentials and owner
/// are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    url: String,
    security_policy: String,
    security_mode: SecurityMode,
}

impl LogicalIdentity for EndpointInfo {
    type Key = EndpointKey;

    fn logical_key(&self) -> EndpointKey {
        EndpointKey {
            url: normalize_uri(&self.endpoint_url),
            security_policy: self.security_policy.trim().to_string(),
            security_mode: self.security_mode,
        }
    }
}

impl Registration for EndpointInfo {
    const DEVICE_TYPE: &'static str = DEVICE_TYPE_ENDPOINT;

    fn to_twin(&self) -> Twin {
        let mut twin = Twin::new(self.id.clone(), None);
        let tags = &mut twin.tags;
        tags.set(TwinKey::DeviceType, DEVICE_TYPE_ENDPOINT);
        tags.set(TwinKey::SchemaVersion, TWIN_SCHEMA_VERSION);
        tags.set(TwinKey::ApplicationId, &self.application_id);
        tags.set(TwinKey::EndpointUrl, &self.endpoint_url);
        tags.set(TwinKey::EndpointUrlLC, normalize_uri(&self.endpoint_url));
        tags.set(TwinKey::AlternativeUrls, &self.alternative_urls);
        tags.set(TwinKey::SecurityMode, self.security_mode);
        tags.set(TwinKey::SecurityPolicy, &self.security_policy);
        tags.set(TwinKey::SecurityLevel, self.security_level);
        tags.set(TwinKey::Credential, self.credential);
        tags.set(TwinKey::AuthenticationMethods, &self.authentication_methods);
        tags.set(TwinKey::ServerThumbprint, &self.server_thumbprint);
        tags.set(TwinKey::SiteId, &self.site_id);
        tags.set(TwinKey::DiscovererId, &self.discoverer_id);
        tags.set(TwinKey::SupervisorId, &self.supervisor_id);
        tags.set(TwinKey::ActivationState, self.activation_state);
        tags.set(TwinKey::NotSeenSince, self.not_seen_since);
        twin
    }

    fn from_twin(twin: &Twin) -> Option<Self> {
        if twin.device_type() != Some(DEVICE_TYPE_ENDPOINT) {
            return None;
        }
        let tags = &twin.tags;
        Some(EndpointInfo {
            id: twin.id.clone(),
            application_id: tags.get_str(&TwinKey::ApplicationId)?.to_string(),
            endpoint_url: tags.get_str(&TwinKey::EndpointUrl)?.to_string(),
            alternative_urls: tags.get_as(&TwinKey::AlternativeUrls).unwrap_or_default(),
            security_mode: tags.get_as(&TwinKey::SecurityMode).unwrap_or_default(),
            security_policy: tags.get_as(&TwinKey::SecurityPolicy).unwrap_or_default(),
            security_level: tags.get_as(&TwinKey::SecurityLevel),
            credential: tags.get_as(&TwinKey::Credential).unwrap_or_default(),
            authentication_methods: tags.get_as(&TwinKey::AuthenticationMethods).unwrap_or_default(),
            server_thumbprint: tags.get_as(&TwinKey::ServerThumbprint),
            site_id: tags.get_as(&TwinKey::SiteId),
            discoverer_id: tags.get_as(&TwinKey::DiscovererId),
            supervisor_id: tags.get_as(&TwinKey::SupervisorId),
            activation_state: tags.get_as(&TwinKey::ActivationState).unwrap_or_default(),
            not_seen_since: tags.get_as(&TwinKey::NotSeenSince),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{AuthenticationMethod, CredentialType};

    fn test_endpoint() -> EndpointInfo {
        EndpointInfo {
            id: "uep1".to_string(),
            application_id: "uat1".to_string(),
            endpoint_url: "opc.tcp://plc:4840/".to_string(),
            security_mode: SecurityMode::SignAndEncrypt,
            security_policy: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256".to_string(),
            security_level: Some(3),
            authentication_methods: vec![AuthenticationMethod {
                id: "anonymous".to_string(),
                ..Default::default()
            }],
            discoverer_id: Some("gw_module_disc".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_twin_round_trip() {
        let endpoint = test_endpoint();
        let twin = endpoint.to_twin();
        assert_eq!(twin.tags.get_str(&TwinKey::EndpointUrlLC), Some("opc.tcp://plc:4840"));
        assert_eq!(EndpointInfo::from_twin(&twin), Some(endpoint));
    }

    #[test]
    fn test_logical_key_ignores_credentials() {
        let a = test_endpoint();
        let mut b = test_endpoint();
        b.endpoint_url = "OPC.TCP://PLC:4840".to_string();
        b.credential = CredentialType::UserName;
        b.discoverer_id = None;
        assert_eq!(a.logical_key(), b.logical_key());

        b.security_mode = SecurityMode::Sign;
        assert_ne!(a.logical_key(), b.logical_key());
    }

    #[test]
    fn test_missing_url_is_not_an_endpoint() {
        let mut twin = test_endpoint().to_twin();
        twin.tags.set(TwinKey::EndpointUrl, None::<String>);
        assert!(EndpointInfo::from_twin(&twin).is_none());
    }
}
