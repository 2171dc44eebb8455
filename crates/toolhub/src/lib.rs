pub mod config;
pub mod providers;
pub mod reasoning;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod tool;

pub use registry::{EnabledSet, LoadStatus, RegistryEvent, ToolRegistry};
pub use session::{Message, Role, Session, SessionConfig, SessionId, SessionOrchestrator};
pub use supervisor::{ShutdownReport, ToolSupervisor};
pub use tool::{Tool, ToolCatalog};
