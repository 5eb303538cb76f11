//! Mount helpers, thin wrappers over the rfuse3 session APIs.

use std::io;
use std::path::Path;

use rfuse3::MountOptions;
use rfuse3::raw::{Filesystem, MountHandle, Session};

/// Mount `fs` at `mount_point` and return the running session handle.
///
/// Unprivileged mounts go through fusermount3; privileged mounts need
/// CAP_SYS_ADMIN.
pub async fn mount_write_only<F>(
    fs: F,
    mount_point: impl AsRef<Path>,
    unprivileged: bool,
) -> io::Result<MountHandle>
where
    F: Filesystem + Send + Sync + 'static,
{
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    let mut mount_options = MountOptions::default();
    mount_options.fs_name("wofs").uid(uid).gid(gid);

    let session = Session::new(mount_options);
    if unprivileged {
        session.mount_with_unprivileged(fs, mount_point).await
    } else {
        session.mount(fs, mount_point).await
    }
}
