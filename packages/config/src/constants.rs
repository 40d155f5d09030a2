// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across the gateway

// Server Configuration
pub const PORT: &str = "PORT";
pub const RCE_HOST: &str = "RCE_HOST";

// Authentication
pub const CUSTOM_RCE_API_KEY: &str = "CUSTOM_RCE_API_KEY";

// Sandbox Image & Execution
pub const RCE_IMAGE_NAME: &str = "RCE_IMAGE_NAME";
pub const RCE_INTERPRETER: &str = "RCE_INTERPRETER";
pub const RCE_WORKDIR: &str = "RCE_WORKDIR";
pub const RCE_MANAGED_BY: &str = "RCE_MANAGED_BY";

// Resource Limits
pub const RCE_MEM_LIMIT_MB: &str = "RCE_MEM_LIMIT_MB";
pub const RCE_CPU_LIMIT: &str = "RCE_CPU_LIMIT";
pub const RCE_NETWORK_ENABLED: &str = "RCE_NETWORK_ENABLED";
pub const RCE_GPU_ENABLED: &str = "RCE_GPU_ENABLED";

// Session Lifecycle
pub const RCE_MAX_SESSIONS: &str = "RCE_MAX_SESSIONS";
pub const RCE_SESSION_TTL: &str = "RCE_SESSION_TTL";
pub const RCE_CLEANUP_INTERVAL: &str = "RCE_CLEANUP_INTERVAL";
pub const RCE_STOP_TIMEOUT: &str = "RCE_STOP_TIMEOUT";

// Shared Volume
pub const RCE_DATA_DIR_HOST: &str = "RCE_DATA_DIR_HOST"; // Path on the Docker host
pub const RCE_DATA_DIR_INTERNAL: &str = "RCE_DATA_DIR_INTERNAL"; // As seen by this process

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
