//! Conversions between twins and service models.
//!
//! Every conversion from a twin is total: a twin of another kind, or one
//! missing required fields, yields `None` (or [`EntityRegistration::Unknown`])
//! instead of an error.

pub mod application;
pub mod endpoint;
pub mod module;

use std::hash::Hash;
use shared::protocol::{
    DEVICE_TYPE_APPLICATION, DEVICE_TYPE_DISCOVERER, DEVICE_TYPE_ENDPOINT, DEVICE_TYPE_GATEWAY,
    DEVICE_TYPE_PUBLISHER, DEVICE_TYPE_SUPERVISOR,
};
use shared::types::{
    ApplicationInfo, DiscovererInfo, EndpointInfo, GatewayInfo, ModuleInfo, PublisherInfo,
    SupervisorInfo,
};
use crate::twin::Twin;

pub use application::ApplicationKey;
pub use endpoint::EndpointKey;

/// A service model with a twin representation.
pub trait Registration: Sized + Clone + Send + Sync {
    const DEVICE_TYPE: &'static str;

    /// Full twin carrying every field of the model
    fn to_twin(&self) -> Twin;

    fn from_twin(twin: &Twin) -> Option<Self>;
}

/// Identity used to match discovered entities against stored ones.
pub trait LogicalIdentity {
    type Key: Eq + Hash + Clone;

    fn logical_key(&self) -> Self::Key;
}

/// Any twin in the registry, decoded by its device type.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRegistration {
    Application(ApplicationInfo),
    Endpoint(EndpointInfo),
    Supervisor(SupervisorInfo),
    Discoverer(DiscovererInfo),
    Publisher(PublisherInfo),
    Gateway(GatewayInfo),
    Unknown {
        id: String,
        device_type: Option<String>,
    },
}

impl EntityRegistration {
    pub fn from_twin(twin: &Twin) -> Self {
        let decoded = match twin.device_type() {
            Some(DEVICE_TYPE_APPLICATION) => ApplicationInfo::from_twin(twin).map(Self::Application),
            Some(DEVICE_TYPE_ENDPOINT) => EndpointInfo::from_twin(twin).map(Self::Endpoint),
            Some(DEVICE_TYPE_SUPERVISOR) => SupervisorInfo::from_twin(twin).map(Self::Supervisor),
            Some(DEVICE_TYPE_DISCOVERER) => DiscovererInfo::from_twin(twin).map(Self::Discoverer),
            Some(DEVICE_TYPE_PUBLISHER) => PublisherInfo::from_twin(twin).map(Self::Publisher),
            Some(DEVICE_TYPE_GATEWAY) => GatewayInfo::from_twin(twin).map(Self::Gateway),
            _ => None,
        };
        decoded.unwrap_or_else(|| EntityRegistration::Unknown {
            id: shared::identity::module_id(&twin.id, twin.module_id.as_deref()),
            device_type: twin.device_type().map(str::to_string),
        })
    }

    pub fn to_twin(&self) -> Option<Twin> {
        match self {
            EntityRegistration::Application(a) => Some(a.to_twin()),
            EntityRegistration::Endpoint(e) => Some(e.to_twin()),
            EntityRegistration::Supervisor(s) => Some(s.to_twin()),
            EntityRegistration::Discoverer(d) => Some(d.to_twin()),
            EntityRegistration::Publisher(p) => Some(p.to_twin()),
            EntityRegistration::Gateway(g) => Some(g.to_twin()),
            EntityRegistration::Unknown { .. } => None,
        }
    }

    /// The edge module arm, if this is one.
    pub fn into_module(self) -> Option<ModuleInfo> {
        match self {
            EntityRegistration::Supervisor(s) => Some(ModuleInfo::Supervisor(s)),
            EntityRegistration::Discoverer(d) => Some(ModuleInfo::Discoverer(d)),
            EntityRegistration::Publisher(p) => Some(ModuleInfo::Publisher(p)),
            EntityRegistration::Gateway(g) => Some(ModuleInfo::Gateway(g)),
            _ => None,
        }
    }
}

impl From<ModuleInfo> for EntityRegistration {
    fn from(module: ModuleInfo) -> Self {
        match module {
            ModuleInfo::Supervisor(s) => EntityRegistration::Supervisor(s),
            ModuleInfo::Discoverer(d) => EntityRegistration::Discoverer(d),
            ModuleInfo::Publisher(p) => EntityRegistration::Publisher(p),
            ModuleInfo::Gateway(g) => EntityRegistration::Gateway(g),
        }
    }
}
