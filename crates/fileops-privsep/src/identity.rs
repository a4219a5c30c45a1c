//! Target identity lookup and adoption.
//!
//! Names are resolved in the parent before forking; the child only applies
//! the resulting ids.

use std::ffi::CString;

use fileops_core::RunAs;
use nix::unistd::{Gid, Uid, User};
use tracing::{debug, warn};

/// Resolved credentials of a user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub name: CString,
    pub uid: Uid,
    pub gid: Gid,
}

/// The identity the child should end up with.
#[derive(Debug, Clone)]
pub enum TargetIdentity {
    /// Keep the daemon's own credentials.
    Inherit,
    /// Switch to the resolved user.
    Switch(Credentials),
    /// The requested user could not be resolved; the child must fail setup.
    Unresolved(String),
}

impl TargetIdentity {
    /// Look up the account named by `run_as`.
    pub fn resolve(run_as: Option<&RunAs>) -> Self {
        let Some(run_as) = run_as else {
            return Self::Inherit;
        };

        let name = match CString::new(run_as.user.as_str()) {
            Ok(name) => name,
            Err(_) => {
                warn!(user = %run_as.user, "user name contains a NUL byte");
                return Self::Unresolved(run_as.user.clone());
            }
        };

        match User::from_name(&run_as.user) {
            Ok(Some(user)) => {
                debug!(user = %run_as.user, uid = %user.uid, gid = %user.gid, "resolved target identity");
                Self::Switch(Credentials {
                    name,
                    uid: user.uid,
                    gid: user.gid,
                })
            }
            Ok(None) => {
                warn!(user = %run_as.user, "no such user");
                Self::Unresolved(run_as.user.clone())
            }
            Err(e) => {
                warn!(user = %run_as.user, error = %e, "user lookup failed");
                Self::Unresolved(run_as.user.clone())
            }
        }
    }

    /// Apply the identity to the calling process.
    ///
    /// Supplementary groups, then the primary group, then the user id. Only
    /// ever called in the forked child.
    pub(crate) fn adopt(&self) -> nix::Result<()> {
        match self {
            Self::Inherit => Ok(()),
            Self::Switch(creds) => {
                set_groups(creds)?;
                nix::unistd::setgid(creds.gid)?;
                nix::unistd::setuid(creds.uid)
            }
            Self::Unresolved(_) => Err(nix::errno::Errno::ENOENT),
        }
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn set_groups(creds: &Credentials) -> nix::Result<()> {
    nix::unistd::initgroups(&creds.name, creds.gid)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_groups(creds: &Credentials) -> nix::Result<()> {
    nix::unistd::setgroups(&[creds.gid])
}
