pub mod attachment;
pub mod backend;
pub mod bus;
pub mod editor;
pub mod file;
pub mod host;
pub mod mention;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod suggest;
pub mod transcript;

// Public library API - the editor extension glue and the subprocess binary
// only need these.
pub use backend::ChatBackend;
pub use bus::{BusConfig, BusError, MessageBus};
pub use host::{Host, HostHandle, HostMessage};
pub use protocol::{Envelope, Request, Response};
pub use session::{ChatSession, SessionError};
pub use settings::{Settings, SettingsManager};
