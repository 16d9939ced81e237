use std::borrow::Cow;
use std::collections::BTreeMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ACTIVATED_ENDPOINT_PREFIX: &str = "ep_";

/// Known twin property names. Every bag access goes through this enum so
/// the layout written by the registry stays in one place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TwinKey {
    DeviceType,
    SchemaVersion,
    ApplicationId,
    ApplicationUri,
    ApplicationUriLC,
    ProductUri,
    ApplicationType,
    ApplicationName,
    Locale,
    LocalizedNames,
    DiscoveryProfileUri,
    DiscoveryUrls,
    HostAddresses,
    Capabilities,
    GatewayServerUri,
    SiteId,
    DiscovererId,
    NotSeenSince,
    Created,
    Updated,
    EndpointUrl,
    EndpointUrlLC,
    AlternativeUrls,
    SecurityMode,
    SecurityPolicy,
    SecurityLevel,
    Credential,
    AuthenticationMethods,
    ServerThumbprint,
    SupervisorId,
    ActivationState,
    Connected,
    Discovery,
    DiscoveryConfig,
    Configuration,
    /// Supervisor-side binding of one endpoint
    ActivatedEndpoint(String),
}

impl TwinKey {
    pub fn name(&self) -> Cow<'static, str> {
        let name = match self {
            TwinKey::DeviceType => "DeviceType",
            TwinKey::SchemaVersion => "SchemaVersion",
            TwinKey::ApplicationId => "ApplicationId",
            TwinKey::ApplicationUri => "ApplicationUri",
            TwinKey::ApplicationUriLC => "ApplicationUriLC",
            TwinKey::ProductUri => "ProductUri",
            TwinKey::ApplicationType => "ApplicationType",
            TwinKey::ApplicationName => "ApplicationName",
            TwinKey::Locale => "Locale",
            TwinKey::LocalizedNames => "LocalizedNames",
            TwinKey::DiscoveryProfileUri => "DiscoveryProfileUri",
            TwinKey::DiscoveryUrls => "DiscoveryUrls",
            TwinKey::HostAddresses => "HostAddresses",
            TwinKey::Capabilities => "Capabilities",
            TwinKey::GatewayServerUri => "GatewayServerUri",
            TwinKey::SiteId => "SiteId",
            TwinKey::DiscovererId => "DiscovererId",
            TwinKey::NotSeenSince => "NotSeenSince",
            TwinKey::Created => "Created",
            TwinKey::Updated => "Updated",
            TwinKey::EndpointUrl => "EndpointUrl",
            TwinKey::EndpointUrlLC => "EndpointUrlLC",
            TwinKey::AlternativeUrls => "AlternativeUrls",
            TwinKey::SecurityMode => "SecurityMode",
            TwinKey::SecurityPolicy => "SecurityPolicy",
            TwinKey::SecurityLevel => "SecurityLevel",
            TwinKey::Credential => "Credential",
            TwinKey::AuthenticationMethods => "AuthenticationMethods",
            TwinKey::ServerThumbprint => "ServerThumbprint",
            TwinKey::SupervisorId => "SupervisorId",
            TwinKey::ActivationState => "ActivationState",
            TwinKey::Connected => "Connected",
            TwinKey::Discovery => "Discovery",
            TwinKey::DiscoveryConfig => "DiscoveryConfig",
            TwinKey::Configuration => "Configuration",
            TwinKey::ActivatedEndpoint(id) => {
                return Cow::Owned(format!("{ACTIVATED_ENDPOINT_PREFIX}{id}"))
            }
        };
        Cow::Borrowed(name)
    }

    /// Endpoint id of an `ActivatedEndpoint` property name.
    pub fn activated_endpoint_id(name: &str) -> Option<&str> {
        name.strip_prefix(ACTIVATED_ENDPOINT_PREFIX)
            .filter(|id| !id.is_empty())
    }
}

/// Flat property map of a twin. A `null` value means "absent" on read and
/// "remove" inside a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(BTreeMap<String, Value>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TwinKey) -> Option<&Value> {
        self.0.get(key.name().as_ref()).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &TwinKey) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Typed read. Values that do not decode are treated as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &TwinKey) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write a value; values serializing to `null` remove the key.
    pub fn set<T: Serialize>(&mut self, key: TwinKey, value: T) {
        match serde_json::to_value(value) {
            Ok(Value::Null) | Err(_) => {
                self.0.remove(key.name().as_ref());
            }
            Ok(v) => {
                self.0.insert(key.name().into_owned(), v);
            }
        }
    }

    /// Mark a key for removal inside a patch.
    pub fn clear(&mut self, key: TwinKey) {
        self.0.insert(key.name().into_owned(), Value::Null);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Changes needed to turn `self` into `desired`. Keys missing from
    /// `desired` come out as `null`.
    pub fn diff(&self, desired: &PropertyBag) -> PropertyBag {
        let mut patch = BTreeMap::new();
        for (key, value) in &desired.0 {
            if self.0.get(key) != Some(value) {
                patch.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.0 {
            if !value.is_null() && !desired.0.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
        PropertyBag(patch)
    }

    /// Apply a patch produced by `diff`.
    pub fn merge(&mut self, patch: &PropertyBag) {
        for (key, value) in &patch.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Drop `null` entries.
    pub fn compact(mut self) -> Self {
        self.0.retain(|_, v| !v.is_null());
        self
    }
}

/// Flat persisted form of any registry entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    pub id: String,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub tags: PropertyBag,
    #[serde(default)]
    pub desired: PropertyBag,
    #[serde(default)]
    pub reported: PropertyBag,
}

impl Twin {
    pub fn new(id: impl Into<String>, module_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            module_id,
            ..Default::default()
        }
    }

    pub fn device_type(&self) -> Option<&str> {
        self.tags.get_str(&TwinKey::DeviceType)
    }

    /// Patch that turns `self` into `desired`, addressed at `self`.
    pub fn patch_to(&self, desired: &Twin) -> Twin {
        Twin {
            id: self.id.clone(),
            module_id: self.module_id.clone(),
            etag: self.etag.clone(),
            tags: self.tags.diff(&desired.tags),
            desired: self.desired.diff(&desired.desired),
            reported: self.reported.diff(&desired.reported),
        }
    }

    pub fn is_empty_patch(&self) -> bool {
        self.tags.is_empty() && self.desired.is_empty() && self.reported.is_empty()
    }

    pub fn apply(&mut self, patch: &Twin) {
        self.tags.merge(&patch.tags);
        self.desired.merge(&patch.desired);
        self.reported.merge(&patch.reported);
    }
}
