use tracing::warn;

/// Whether the process runs with root privileges.
#[cfg(unix)]
pub fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
pub fn running_as_root() -> bool {
    false
}

/// Package managers refuse most operations without root. This only warns;
/// the individual backend failures are reported where they happen.
pub fn warn_if_unprivileged() -> bool {
    let root = running_as_root();
    if !root {
        warn!("Not running as root; package manager operations will likely fail");
    }
    root
}
