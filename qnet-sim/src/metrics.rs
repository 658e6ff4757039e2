//! Counter and latency names recorded through the shared telemetry handle.

pub const DISPATCHED: &str = "network.dispatched";
pub const DROPPED: &str = "network.dropped";
pub const NO_ROUTE: &str = "network.no_route";
pub const DELIVERED: &str = "network.delivered";
pub const QUBIT_LOST: &str = "network.qubit_lost";
pub const EPR_SWAPPED: &str = "network.epr.swapped";
pub const EPR_FABRICATED: &str = "network.epr.fabricated";

pub const RELAYED: &str = "host.relayed";
pub const TTL_EXPIRED: &str = "host.ttl_expired";
pub const ACK_TIMEOUT: &str = "host.ack.timeout";
pub const STORAGE_EVICTED: &str = "host.storage.evicted";
pub const PROTOCOL_ERROR: &str = "host.protocol_error";

pub const ACK_LATENCY_MS: &str = "host.ack_ms";
