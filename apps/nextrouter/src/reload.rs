use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use nextrouter_dsl::Registry;

/// SIGHUP triggers an atomic registry reload; a failed reload logs and
/// keeps the previous plans serving.
pub fn spawn_sighup_reload(registry: Arc<Registry>, dsl_dir: PathBuf) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut hup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(signal) => signal,
            Err(err) => {
                error!(event = "sighup_install_failed", error = %err);
                return;
            }
        };
        while hup.recv().await.is_some() {
            match registry.reload_dir(&dsl_dir) {
                Ok(()) => info!(
                    event = "registry_reloaded",
                    providers = registry.len(),
                    dir = %dsl_dir.display()
                ),
                Err(err) => error!(event = "registry_reload_failed", error = %err),
            }
        }
    });

    #[cfg(not(unix))]
    let _ = (registry, dsl_dir);
}
