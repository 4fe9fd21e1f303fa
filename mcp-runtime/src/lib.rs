pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use protocol::{PROTOCOL_VERSION, RpcError};
pub use registry::{
    PromptDef, PromptRegistry, Registries, ResourceDef, ResourceRegistry, ToolDef, ToolRegistry,
};
pub use server::{McpServer, SESSION_HEADER};
pub use session::{KvSessionStore, MemorySessionStore, Session, SessionError, SessionStore};
