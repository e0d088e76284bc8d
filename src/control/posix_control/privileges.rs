//! Privilege checking for init-script installation.

/// Signature of the privilege check; swappable so the backend can be
/// exercised without root.
pub type PrivilegeCheck = fn() -> bool;

/// Root is judged by the effective uid, so `sudo` and setuid wrappers count.
#[inline]
pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}
