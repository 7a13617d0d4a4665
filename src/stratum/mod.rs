pub mod connection;
pub mod protocol;
pub mod server;
pub mod vardiff;

pub use connection::{ConnectionHandle, ConnectionState, RequestDispatcher};
pub use protocol::{StratumError, StratumMessage, StratumRequest, StratumResponse};
pub use server::StratumServer;
pub use vardiff::{VarDiffConfig, VarDiffContext};
