use std::collections::{BTreeMap, BTreeSet};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Kind of OPC UA application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ApplicationType {
    #[default]
    Server,
    Client,
    ClientAndServer,
    DiscoveryServer,
}

impl ApplicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationType::Server => "Server",
            ApplicationType::Client => "Client",
            ApplicationType::ClientAndServer => "ClientAndServer",
            ApplicationType::DiscoveryServer => "DiscoveryServer",
        }
    }
}

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    #[default]
    Best,
    None,
    Sign,
    SignAndEncrypt,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Best => "Best",
            SecurityMode::None => "None",
            SecurityMode::Sign => "Sign",
            SecurityMode::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

/// Shape of the credential a client presents to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CredentialType {
    #[default]
    None,
    UserName,
    X509Certificate,
    JwtToken,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::None => "None",
            CredentialType::UserName => "UserName",
            CredentialType::X509Certificate => "X509Certificate",
            CredentialType::JwtToken => "JwtToken",
        }
    }
}

/// Whether a supervisor holds a runtime connection for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActivationState {
    #[default]
    Deactivated,
    Activated,
}

/// Discovery mode a discoverer runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiscoveryMode {
    #[default]
    Off,
    Local,
    Network,
    Fast,
    Scan,
}

/// Who changed a registry entry and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOperation {
    pub authority_id: String,
    pub time: DateTime<Utc>,
}

/// An OPC UA server or client known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationInfo {
    /// Derived identifier, see `identity::application_id`
    #[serde(default)]
    pub application_id: String,

    pub application_uri: String,

    #[serde(default)]
    pub product_uri: Option<String>,

    #[serde(default)]
    pub application_type: ApplicationType,

    /// Default display name
    #[serde(default)]
    pub application_name: Option<String>,

    /// Locale of the default display name
    #[serde(default)]
    pub locale: Option<String>,

    /// Display names keyed by locale
    #[serde(default)]
    pub localized_names: BTreeMap<String, String>,

    #[serde(default)]
    pub discovery_profile_uri: Option<String>,

    #[serde(default)]
    pub discovery_urls: BTreeSet<String>,

    #[serde(default)]
    pub host_addresses: BTreeSet<String>,

    /// Server capability identifiers, upper-cased
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    #[serde(default)]
    pub gateway_server_uri: Option<String>,

    #[serde(default)]
    pub site_id: Option<String>,

    /// Discoverer that currently owns this application
    #[serde(default)]
    pub discoverer_id: Option<String>,

    /// Set while the application is disabled
    #[serde(default)]
    pub not_seen_since: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created: Option<RegistryOperation>,

    #[serde(default)]
    pub updated: Option<RegistryOperation>,
}

impl ApplicationInfo {
    pub fn is_enabled(&self) -> bool {
        self.not_seen_since.is_none()
    }

    /// True when both sides carry the same data, ignoring audit fields.
    pub fn same_content(&self, other: &ApplicationInfo) -> bool {
        let strip = |a: &ApplicationInfo| ApplicationInfo {
            created: None,
            updated: None,
            ..a.clone()
        };
        strip(self) == strip(other)
    }
}

/// One way of authenticating against an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthenticationMethod {
    pub id: String,
    #[serde(default)]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub security_policy: Option<String>,
    #[serde(default)]
    pub configuration: Option<serde_json::Value>,
}

/// A single endpoint exposed by an application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointInfo {
    #[serde(default)]
    pub id: String,

    /// Owning application
    #[serde(default)]
    pub application_id: String,

    pub endpoint_url: String,

    #[serde(default)]
    pub alternative_urls: BTreeSet<String>,

    #[serde(default)]
    pub security_mode: SecurityMode,

    #[serde(default)]
    pub security_policy: String,

    #[serde(default)]
    pub security_level: Option<i32>,

    #[serde(default)]
    pub credential: CredentialType,

    #[serde(default)]
    pub authentication_methods: Vec<AuthenticationMethod>,

    #[serde(default)]
    pub server_thumbprint: Option<String>,

    #[serde(default)]
    pub site_id: Option<String>,

    #[serde(default)]
    pub discoverer_id: Option<String>,

    /// Supervisor holding the runtime connection, if activated
    #[serde(default)]
    pub supervisor_id: Option<String>,

    #[serde(default)]
    pub activation_state: ActivationState,

    #[serde(default)]
    pub not_seen_since: Option<DateTime<Utc>>,
}

impl EndpointInfo {
    pub fn is_enabled(&self) -> bool {
        self.not_seen_since.is_none()
    }

    pub fn is_activated(&self) -> bool {
        self.activation_state == ActivationState::Activated
    }
}

/// Application together with its endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application: ApplicationInfo,
    pub endpoints: Vec<EndpointInfo>,
}

/// Explicit registration of an application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationRegistrationRequest {
    pub application_uri: String,
    #[serde(default)]
    pub product_uri: Option<String>,
    #[serde(default)]
    pub application_type: ApplicationType,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub localized_names: BTreeMap<String, String>,
    #[serde(default)]
    pub discovery_profile_uri: Option<String>,
    #[serde(default)]
    pub discovery_urls: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub gateway_server_uri: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRegistrationResult {
    pub id: String,
}

/// Partial update of an application; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationRegistrationUpdate {
    #[serde(default)]
    pub product_uri: Option<String>,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub localized_names: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub discovery_profile_uri: Option<String>,
    #[serde(default)]
    pub discovery_urls: Option<BTreeSet<String>>,
    #[serde(default)]
    pub capabilities: Option<BTreeSet<String>>,
    #[serde(default)]
    pub gateway_server_uri: Option<String>,
}

/// Filter for application queries. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationQuery {
    #[serde(default)]
    pub application_uri: Option<String>,
    #[serde(default)]
    pub product_uri: Option<String>,
    #[serde(default)]
    pub application_type: Option<ApplicationType>,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub discovery_profile_uri: Option<String>,
    #[serde(default)]
    pub gateway_server_uri: Option<String>,
    #[serde(default)]
    pub site_or_gateway_id: Option<String>,
    #[serde(default)]
    pub discoverer_id: Option<String>,
    #[serde(default)]
    pub include_not_seen_since: bool,
}

/// Filter for endpoint queries. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointQuery {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub site_or_gateway_id: Option<String>,
    #[serde(default)]
    pub discoverer_id: Option<String>,
    #[serde(default)]
    pub security_mode: Option<SecurityMode>,
    #[serde(default)]
    pub security_policy: Option<String>,
    #[serde(default)]
    pub activated: Option<bool>,
    #[serde(default)]
    pub include_not_seen_since: bool,
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

/// Supervisor module managing endpoint connections on an edge gateway.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupervisorInfo {
    pub id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,
    /// Endpoints currently bound to this supervisor
    #[serde(default)]
    pub activated_endpoints: BTreeSet<String>,
}

/// Discovery module scanning the network on an edge gateway.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscovererInfo {
    pub id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub discovery: DiscoveryMode,
    #[serde(default)]
    pub discovery_config: Option<serde_json::Value>,
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub not_seen_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub configuration: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,
}

/// Any of the edge modules the registry tracks besides applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModuleInfo {
    Supervisor(SupervisorInfo),
    Discoverer(DiscovererInfo),
    Publisher(PublisherInfo),
    Gateway(GatewayInfo),
}

impl ModuleInfo {
    pub fn id(&self) -> &str {
        match self {
            ModuleInfo::Supervisor(s) => &s.id,
            ModuleInfo::Discoverer(d) => &d.id,
            ModuleInfo::Publisher(p) => &p.id,
            ModuleInfo::Gateway(g) => &g.id,
        }
    }
}

/// Summary a discoverer attaches to a batch of discovery events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
    #[serde(default)]
    pub id: Option<String>,
    /// Only add or update, never disable or delete
    #[serde(default)]
    pub register_only: bool,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub time_stamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub diagnostics: Option<serde_json::Value>,
}

/// One endpoint of one application found during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    #[serde(default)]
    pub time_stamp: Option<DateTime<Utc>>,
    pub application: ApplicationInfo,
    pub registration: EndpointInfo,
    #[serde(default)]
    pub index: u32,
}
