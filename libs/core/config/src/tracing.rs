use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing with environment-aware configuration
///
/// - **Production** (`APP_ENV=production`):
///   - JSON format (for log aggregation tools like ELK, Datadog, CloudWatch)
///   - Hides module targets for cleaner logs
///
/// - **Development** (default):
///   - Pretty-printed format (human-readable)
///   - Shows module targets for debugging
///
/// Environment variables:
/// - `APP_ENV`: Set to "production" for JSON logs (default: "development")
/// - `LOG_LEVEL`: Override log levels (e.g., "debug", "bus_worker=trace")
/// - `RUST_LOG`: Same as `LOG_LEVEL`, checked second
///
/// This function is infallible - if tracing is already initialized, it silently continues.
pub fn init_tracing(environment: Environment) {
    let is_production = environment.is_production();

    // LOG_LEVEL first, then RUST_LOG, then per-environment defaults
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            if is_production {
                // Production: Less verbose, focus on warnings and errors
                EnvFilter::new("info,lapin=warn,hyper=warn")
            } else {
                // Development: More verbose for debugging
                EnvFilter::new("debug,lapin=info,hyper=info")
            }
        });

    let result = if is_production {
        // Production: JSON format for log aggregation
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false) // Hide module paths in production
            .try_init()
    } else {
        // Development: Pretty format for readability
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true) // Show module paths for debugging
            .pretty()
            .try_init()
    };

    // Handle initialization result
    match result {
        Ok(_) => {
            info!("Tracing initialized. Environment: {:?}", environment);
        }
        Err(_) => {
            // Tracing already initialized, which is fine (common in tests)
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}
