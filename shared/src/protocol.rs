/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Version of the twin tag/property layout written by the registry
pub const TWIN_SCHEMA_VERSION: u32 = 1;

/// Device type discriminators stored on every twin
pub const DEVICE_TYPE_APPLICATION: &str = "Application";
pub const DEVICE_TYPE_ENDPOINT: &str = "Endpoint";
pub const DEVICE_TYPE_SUPERVISOR: &str = "Supervisor";
pub const DEVICE_TYPE_DISCOVERER: &str = "Discoverer";
pub const DEVICE_TYPE_PUBLISHER: &str = "Publisher";
pub const DEVICE_TYPE_GATEWAY: &str = "Gateway";

/// Identifier prefixes for derived ids
pub const APPLICATION_ID_PREFIX: &str = "uat";
pub const ENDPOINT_ID_PREFIX: &str = "uep";

/// Separator between device and module part of a module twin id
pub const MODULE_ID_SEPARATOR: &str = "_module_";

/// Default page size for store queries
pub const DEFAULT_PAGE_SIZE: usize = 100;
