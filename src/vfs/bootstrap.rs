//! Base directory structure, created idempotently on either backend.

use tracing::info;

use super::backend::FsBackend;
use crate::kernel::error::KernelResult;
use crate::security::User;

pub const SHARED_DIRS: [&str; 3] = ["/users", "/apps", "/system"];

pub const WELCOME_FILE: &str = "Welcome.txt";

const WELCOME_TEXT: &str = "Welcome to WebDesk!\n\n\
Your files live under your home directory. Documents and Desktop were \
created for you; anything you save here is kept between sessions.\n";

/// Create the shared directories, and the user's home (with Desktop,
/// Documents and a welcome note) when `user` is given. Existing nodes are
/// left alone, so this is safe to run on every login.
pub async fn ensure_base_structure(fs: &dyn FsBackend, user: Option<&User>) -> KernelResult<()> {
    let mut created = 0usize;
    for dir in SHARED_DIRS {
        created += ensure_dir(fs, dir).await? as usize;
    }

    if let Some(user) = user {
        let home = user.home_dir();
        for dir in [
            home.clone(),
            format!("{home}/Desktop"),
            format!("{home}/Documents"),
        ] {
            created += ensure_dir(fs, &dir).await? as usize;
        }
        let welcome = format!("{home}/Desktop/{WELCOME_FILE}");
        if !fs.exists(&welcome).await? {
            fs.write_file(&welcome, WELCOME_TEXT).await?;
            created += 1;
        }
    }

    if created > 0 {
        info!(
            backend = %fs.kind(),
            user = user.map(|u| u.username.as_str()),
            created,
            "base filesystem structure created"
        );
    }
    Ok(())
}

async fn ensure_dir(fs: &dyn FsBackend, path: &str) -> KernelResult<bool> {
    if fs.exists(path).await? {
        return Ok(false);
    }
    fs.create_directory(path).await?;
    Ok(true)
}
