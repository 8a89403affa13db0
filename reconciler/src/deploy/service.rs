//! Web server restart

use tracing::{debug, info};

use crate::deploy::exec_error;
use crate::errors::DeployError;
use crate::remote::RemoteHost;
use crate::utils::shell_quote;

/// Restart the named service, preferring systemd
///
/// Falls back to the SysV `service` wrapper on hosts without `systemctl`.
pub async fn restart(host: &RemoteHost, service: &str) -> Result<(), DeployError> {
    debug!("Restarting service: {}", service);

    let name = shell_quote(service);
    let command = format!(
        "if command -v systemctl >/dev/null 2>&1; then systemctl restart {name}; \
         else service {name} restart; fi"
    );
    let output = host.run_privileged(&command).await.map_err(exec_error)?;

    if !output.success() {
        return Err(DeployError::ServiceRestartFailed(format!(
            "{}: {}",
            service,
            output.describe()
        )));
    }

    info!("Restarted service: {}", service);
    Ok(())
}
