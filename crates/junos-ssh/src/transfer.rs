use std::path::Path;

use tracing::info;
use upgrade_core::config::SshConfig;
use upgrade_core::device::{Credentials, FileTransfer, RemotePath};

use crate::process;
use crate::session::SshConnector;
use crate::Result;

/// Uploads images with `scp` over the same control master the session
/// uses. A destination on a specific RE is uploaded to the attached RE
/// first and then copied across with `file copy`.
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    connector: SshConnector,
    credentials: Credentials,
}

impl ScpTransfer {
    pub fn new(config: &SshConfig, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            connector: SshConnector::new(config)?,
            credentials,
        })
    }
}

impl FileTransfer for ScpTransfer {
    fn copy_local_to_device(
        &self,
        source: &Path,
        host: &str,
        destination: &RemotePath,
    ) -> upgrade_core::Result<()> {
        let target = self.connector.target(host, &self.credentials);
        let label = format!("scp {} {host}:{}", source.display(), destination.path);
        info!("Copying {} to {host}:{}", source.display(), destination.path);
        process::run_checked(
            target.scp_command(source, &destination.path),
            &label,
            None,
            self.connector.command_timeout(),
        )?;

        if let Some(re) = destination.re {
            let command = format!("file copy {} {}", destination.path, destination);
            info!("{command}");
            process::run_checked(
                target.ssh_command(&command),
                &command,
                None,
                self.connector.command_timeout(),
            )?;
            info!("Uploaded {} to {re}", destination.path);
        }
        Ok(())
    }
}
