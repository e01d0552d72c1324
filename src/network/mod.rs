pub mod api_client;
pub mod config;
pub mod payloads;

pub use api_client::{
    ApiClient, ApiError, FetchTransport, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    TransportError,
};
pub use config::ApiConfig;
pub use payloads::{
    DeleteWorkflowPayload, EnvironmentPayload, EnvironmentResponse, SyncedWorkflowState,
    WorkflowListResponse, WorkflowRecord, WorkflowSyncPayload,
};
