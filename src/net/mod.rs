//! TCP listener/session layer and UDP discovery
//!
//! One OS thread per accepted connection, one accept thread per listener,
//! one thread per broadcaster. Every blocking socket call carries a bounded
//! timeout so each loop can observe its shutdown flag; that timeout-poll
//! pattern is the only cancellation mechanism.

pub mod broadcaster;
pub mod listener;
pub mod session;

pub use broadcaster::UdpBroadcaster;
pub use listener::{DrainHandler, HandlerFactory, TcpServer};
pub use session::{Connection, Session, SessionHandler};
