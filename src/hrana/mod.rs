//! HRANA protocol server (§4.4): a pipelined database-access protocol
//! multiplexer with baton-based session continuity, conditional batch
//! execution, and a pluggable `DatabaseAdapter` contract.

pub mod adapter;
pub mod batch;
pub mod error;
pub mod request;
pub mod server;
pub mod session;
pub mod value;
pub mod websocket;

pub use adapter::{AdapterResolver, DatabaseAdapter};
#[cfg(feature = "libsql-adapter")]
pub use adapter::libsql_adapter::FileResolver;
pub use error::{map_error, AdapterError, RawCode};
pub use request::{PipelineRequest, PipelineResponse, StreamRequest, StreamResult};
pub use server::HranaServer;
pub use session::SessionManager;
pub use value::{HranaValue, Scalar};
