//! `junos-ssh`: drives Junos devices for the upgrade engine through the
//! local OpenSSH client.
//!
//! Implements the `upgrade_core::device` seams without a NETCONF stack:
//! every operation is a Junos CLI command run over `ssh`, with structured
//! replies requested as `| display json`.
//!
//! # Architecture
//!
//! ```text
//! SshConnector      ← resolves ssh/scp, one control master per host
//!     │
//!     ▼
//! SshSession        ← `show ... | display json` per query
//!     │              reboot/switchover tolerate the dropped connection
//!     ▼
//! types.rs          ← typed views of the JSON replies; missing = absent
//!
//! SshConfigContext  ← candidate buffered locally, replayed inside
//!                     `configure exclusive` for compare / commit
//! ScpTransfer       ← scp upload, `file copy` to the peer RE
//! ```

pub mod error;
pub mod session;
pub mod transfer;
pub mod types;

pub(crate) mod process;


pub use error::SshError;
pub use session::{SshConfigContext, SshConnector, SshSession};
pub use transfer::ScpTransfer;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, SshError>;
