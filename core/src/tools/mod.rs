pub mod descriptor;
pub mod error;
pub mod registry;

// Re-export common types
pub use descriptor::ToolDescriptor;
pub use error::{ToolError, ToolResult};
pub use registry::ToolRegistry;
