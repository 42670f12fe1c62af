mod acl;
mod driver;
mod resolve;
mod session;
mod server;

pub use acl::PermittedPeerList;
pub use driver::{DriverError, DriverMode, DriverStream, PlainDriver, RecvOutcome, StreamDriver};
#[cfg(feature = "tls")]
pub use driver::tls::TlsDriver;
pub use server::{ListenerSpec, ServerError, ServerHandle, ServerParams, TcpServer};
pub use session::{FramingError, FramingPolicy, Session, SessionState};
