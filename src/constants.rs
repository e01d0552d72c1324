// Default values for workflows - these are the single source of truth for defaults
pub const DEFAULT_WORKFLOW_NAME_PREFIX: &str = "Workflow";
pub const DEFAULT_WORKFLOW_DESCRIPTION: &str = "New workflow";

// Round-robin palette for new workflows
pub const WORKFLOW_COLORS: [&str; 7] = [
    "#3972F6", "#F639DD", "#F6B539", "#8139F6", "#39B54A", "#39B5AB", "#F66839",
];

// Starter block placed into every freshly created workflow
pub const STARTER_BLOCK_TYPE: &str = "starter";
pub const STARTER_BLOCK_NAME: &str = "Start";
pub const STARTER_BLOCK_X: f64 = 100.0;
pub const STARTER_BLOCK_Y: f64 = 100.0;

// Undo/redo stack bound for the workflow store
pub const MAX_HISTORY_LENGTH: usize = 20;

// Loop iteration bounds
pub const DEFAULT_LOOP_ITERATIONS: u32 = 5;
pub const MIN_LOOP_ITERATIONS: u32 = 1;
pub const MAX_LOOP_ITERATIONS: u32 = 50;

// Local cache keys
pub const REGISTRY_STORAGE_KEY: &str = "workflow-registry";
pub const WORKFLOW_STATE_KEY_PREFIX: &str = "workflow-state-";
pub const SUBBLOCK_VALUES_KEY_PREFIX: &str = "subblock-values-";
pub const ACTIVE_WORKFLOW_KEY: &str = "active-workflow-id";
pub const DELETED_WORKFLOWS_KEY: &str = "deleted-workflow-ids";
pub const ENVIRONMENT_STORAGE_KEY: &str = "environment-variables";

// Sync timing (milliseconds)
pub const WORKFLOW_SYNC_DELAY_MS: u32 = 2000;
pub const WORKFLOW_SYNC_MAX_WAIT_MS: u32 = 10000;
pub const ENVIRONMENT_SYNC_DELAY_MS: u32 = 500;
pub const ENVIRONMENT_SYNC_MAX_WAIT_MS: u32 = 5000;
pub const SYNC_INTERVAL_MS: u32 = 30000;

// Sync manager names, used to look managers up in the registry
pub const WORKFLOW_SYNC_NAME: &str = "workflows";
pub const ENVIRONMENT_SYNC_NAME: &str = "environment";

// Message shown by the browser's native "leave page" prompt
pub const UNSAVED_CHANGES_PROMPT: &str = "You have unsaved changes. Are you sure you want to leave?";
