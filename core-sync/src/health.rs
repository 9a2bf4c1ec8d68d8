//! Remote health probe.
//!
//! Lists the configured root folder to find out whether the stored
//! credentials still work, and moves the system state accordingly:
//!
//! | Probe result        | System state          |
//! |---------------------|-----------------------|
//! | no root configured  | SETUP                 |
//! | listing succeeds    | ACTIVE                |
//! | auth rejected       | MAINTENANCE           |
//! | transient failure   | unchanged             |

use crate::coordinator::SyncCoordinator;
use crate::status::SystemState;
use crate::Result;
use tracing::{info, instrument, warn};

impl SyncCoordinator {
    #[instrument(skip(self))]
    pub async fn check_health(&self) -> Result<SystemState> {
        let app = self.config_store().load().await?;

        let mut auth_error = None;
        let target = match app.root_folder() {
            None => Some(SystemState::Setup),
            Some(root) => match self.source().list_children(root).await {
                Ok(_) => Some(SystemState::Active),
                Err(e) if e.is_auth() => {
                    auth_error = Some(e.to_string());
                    Some(SystemState::Maintenance)
                }
                Err(e) => {
                    warn!(error = %e, "Health probe inconclusive, keeping current state");
                    None
                }
            },
        };

        let now = self.clock().now();
        let mut previous = None;
        let status = self
            .status()
            .update(|status| {
                status.last_checked = Some(now);
                if let Some(state) = target {
                    previous = Some(status.state);
                    status.state = state;
                }
                if let Some(message) = auth_error {
                    status.last_error = Some(message);
                    status.last_error_time = Some(now);
                }
            })
            .await?;

        self.emit_state_change(previous, &status);
        info!(state = %status.state, "Health check finished");
        Ok(status.state)
    }
}
