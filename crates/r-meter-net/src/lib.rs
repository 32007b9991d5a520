//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Counter transports and endpoint poller."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Fetching and validating counter readings.

pub mod poller;
pub mod transport;

use std::sync::Arc;

use r_meter_common::config::TransportKind;
use r_meter_sim::CounterRegistry;

pub use poller::{decode_payload, EndpointPoller, PayloadError};
pub use transport::{CounterTransport, HttpTransport, InProcessTransport, TransportError};

/// Build the transport selected in configuration. The in-process transport needs
/// the local simulator registry.
pub fn build_transport(
    kind: TransportKind,
    registry: Option<Arc<CounterRegistry>>,
) -> Result<Arc<dyn CounterTransport>, TransportError> {
    let transport: Arc<dyn CounterTransport> = match (kind, registry) {
        (TransportKind::Http, _) => Arc::new(HttpTransport::new()?),
        (TransportKind::InProcess, Some(registry)) => Arc::new(InProcessTransport::new(registry)),
        (TransportKind::InProcess, None) => return Err(TransportError::NoRegistry),
    };
    Ok(transport)
}
