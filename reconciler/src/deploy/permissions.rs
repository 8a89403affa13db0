//! Ownership and mode normalization for the web root

use tracing::{debug, info};

use crate::deploy::exec_error;
use crate::errors::DeployError;
use crate::models::deployment::{DeployTarget, PermissionModes};
use crate::remote::RemoteHost;
use crate::utils::shell_quote;

/// Ordered identities to try: the target's service user, then the extras
pub fn candidate_identities(target: &DeployTarget, extra: &[String]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for name in std::iter::once(&target.service_user).chain(extra.iter()) {
        let name = name.trim();
        if !name.is_empty() && !candidates.iter().any(|c| c == name) {
            candidates.push(name.to_string());
        }
    }
    candidates
}

/// First candidate that exists on the host
pub async fn resolve_identity(host: &RemoteHost, candidates: &[String]) -> Result<String, DeployError> {
    if candidates.is_empty() {
        return Err(DeployError::PermissionApplyFailed(
            "no serving identity candidates configured".to_string(),
        ));
    }

    let list = candidates
        .iter()
        .map(|c| shell_quote(c))
        .collect::<Vec<_>>()
        .join(" ");
    let command = format!(
        "for u in {}; do if id -u \"$u\" >/dev/null 2>&1; then echo \"$u\"; exit 0; fi; done; exit 1",
        list
    );
    let output = host.run(&command).await.map_err(exec_error)?;

    let identity = output.stdout.trim();
    if !output.success() || identity.is_empty() {
        return Err(DeployError::PermissionApplyFailed(format!(
            "none of the serving identities exist: {}",
            candidates.join(", ")
        )));
    }

    debug!("Resolved serving identity: {}", identity);
    Ok(identity.to_string())
}

/// Recursively chown the tree to `identity` and reset directory/file modes
pub async fn normalize(
    host: &RemoteHost,
    target: &DeployTarget,
    identity: &str,
) -> Result<PermissionModes, DeployError> {
    let modes = PermissionModes::default();
    let path = shell_quote(&target.path);
    let command = format!(
        "chown -R {owner} {path} && \
         find {path} -type d -exec chmod {dirs} {{}} + && \
         find {path} -type f -exec chmod {files} {{}} +",
        owner = shell_quote(&format!("{}:", identity)),
        path = path,
        dirs = modes.dirs,
        files = modes.files,
    );
    let output = host.run_privileged(&command).await.map_err(exec_error)?;

    if !output.success() {
        return Err(DeployError::PermissionApplyFailed(output.describe()));
    }

    info!(
        "Normalized {} to owner {} (dirs {}, files {})",
        target, identity, modes.dirs, modes.files
    );
    Ok(modes)
}
