/// API route configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    base_url: String,
}

const DEV_BASE_URL: &str = "http://localhost:8001";

impl Default for ApiConfig {
    /// Points at the local development backend.  Only meant for tests and for
    /// builds where neither `API_BASE_URL` nor a page origin is available.
    fn default() -> Self {
        Self::from_url(DEV_BASE_URL)
    }
}

impl ApiConfig {
    /// Create a new ApiConfig from the API_BASE_URL build-time variable
    pub fn from_env() -> Result<Self, &'static str> {
        if let Some(url) = option_env!("API_BASE_URL") {
            Ok(Self::from_url(url))
        } else {
            Err("API_BASE_URL environment variable is not set")
        }
    }

    /// Create a new ApiConfig from a URL string
    pub fn from_url(url: &str) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
        }
    }

    /// Use the origin the page was served from.
    pub fn from_window_location() -> Option<Self> {
        let origin = web_sys::window()?.location().origin().ok()?;
        if origin.is_empty() || origin == "null" {
            return None;
        }
        Some(Self::from_url(&origin))
    }

    /// Build-time variable, then page origin, then the dev backend.
    pub fn resolve() -> Self {
        if let Ok(config) = Self::from_env() {
            return config;
        }
        match Self::from_window_location() {
            Some(config) => config,
            None => {
                log::warn!("No API base URL configured, using {}", DEV_BASE_URL);
                Self::default()
            }
        }
    }

    /// Get the base URL for all API calls
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get a full API URL for a given path
    pub fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub fn workflows_sync_url(&self) -> String {
        self.url("/workflows/sync")
    }

    pub fn environment_url(&self) -> String {
        self.url("/environment")
    }
}
