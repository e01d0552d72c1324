pub mod environment;
pub mod registry;
pub mod subblock;
pub mod workflow;

pub use environment::EnvironmentStore;
pub use registry::{ActiveWorkflow, CreateWorkflowOptions, LinkedStores, RegistryError, RegistryStore};
pub use subblock::{merge_subblock_state, SubBlockStore};
pub use workflow::WorkflowStore;
