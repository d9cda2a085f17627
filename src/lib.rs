//! Stage Tuner Library
//!
//! Course-stage configuration store and the binary frame protocol used to
//! push tuning parameters to the robot controller over serial.

pub mod config_loader;
pub mod error;
pub mod globals;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod stage;
pub mod store;
pub mod textfile;
pub mod transport;

pub use error::{Result, TunerError};
pub use globals::{GlobalConfig, GlobalStore};
pub use schema::ProtocolVersion;
pub use session::Session;
pub use stage::{FollowMode, PidGains, StageRecord, TerminationAction, TerminationCondition};
pub use store::StageStore;
pub use transport::{SerialOpener, Transport};
