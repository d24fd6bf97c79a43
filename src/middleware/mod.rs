//! Ambient HTTP middleware: request tracking, header propagation.
//!
//! Plugin- and worker-specific route matching lives in [`crate::plugin`];
//! this module holds only the cross-cutting concerns every request passes
//! through regardless of which plugin or worker ultimately serves it.

pub mod request_tracking;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
