//! Shell process lifecycle: pty creation, scoped signal disposition, and
//! the reader thread feeding the expect machinery.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ShellConfig;
use crate::error::SessionError;

/// Rc file used when the configuration names none: behave like a login
/// environment, then hand over a predictable prompt for the first
/// synchronization exchange.
const DEFAULT_RC: &str = "\
if [ -f /etc/bash.bashrc ]; then source /etc/bash.bashrc; fi
if [ -f ~/.bashrc ]; then source ~/.bashrc; fi
PS1=\"$\"
export PAGER=cat
";

/// A freshly spawned, not yet synchronized shell.
pub(crate) struct SpawnedShell {
    pub child: Box<dyn Child + Send + Sync>,
    pub master: Box<dyn MasterPty + Send>,
    pub writer: Box<dyn Write + Send>,
    pub reader_rx: Receiver<Vec<u8>>,
    pub reader_handle: thread::JoinHandle<()>,
    pub init: InitFile,
}

/// The init file handed to the shell; generated ones are deleted once
/// startup synchronization completes.
pub(crate) enum InitFile {
    User(PathBuf),
    Generated(PathBuf),
}

impl InitFile {
    fn resolve(config: &ShellConfig) -> Result<Self, SessionError> {
        match &config.init_file {
            Some(path) => Ok(InitFile::User(path.clone())),
            None => {
                let path = std::env::temp_dir()
                    .join(format!("shellbridge-rc-{}.sh", Uuid::new_v4().simple()));
                fs::write(&path, DEFAULT_RC)?;
                Ok(InitFile::Generated(path))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            InitFile::User(path) => path,
            InitFile::Generated(path) => path,
        }
    }

    pub(crate) fn cleanup(self) {
        if let InitFile::Generated(path) = self {
            let _ = fs::remove_file(path);
        }
    }
}

/// Spawn the shell on a fresh pty.
///
/// SIGINT and SIGPIPE are reset to their default dispositions for the
/// duration of child creation only: children inherit dispositions, and a
/// shell that ignores SIGINT cannot be interrupted nor can its pipelines
/// close cleanly. The caller's handlers are restored before returning.
pub(crate) fn spawn_shell(config: &ShellConfig) -> Result<SpawnedShell, SessionError> {
    let spawn_error = |source: anyhow::Error| SessionError::Spawn {
        shell: config.path.clone(),
        source,
    };

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(spawn_error)?;

    // Without echo suppression every command line we write would come
    // straight back as output.
    disable_echo(pair.master.as_ref());

    let init = InitFile::resolve(config)?;
    let mut cmd = CommandBuilder::new(&config.path);
    cmd.arg("--rcfile");
    cmd.arg(init.path());
    cmd.cwd(std::env::current_dir()?);
    cmd.env("TERM", "dumb");

    let child = {
        let saved = SavedSignals::reset_for_spawn();
        let _restore = scopeguard::guard(saved, SavedSignals::restore);
        pair.slave.spawn_command(cmd)
    };
    let child = match child {
        Ok(child) => child,
        Err(source) => {
            init.cleanup();
            return Err(spawn_error(source));
        }
    };
    drop(pair.slave);
    debug!(shell = %config.path, pid = ?child.process_id(), "shell spawned");

    let reader = pair.master.try_clone_reader().map_err(spawn_error)?;
    let writer = pair.master.take_writer().map_err(spawn_error)?;

    let (tx, reader_rx) = mpsc::channel();
    let reader_handle = thread::spawn(move || {
        let mut reader = reader;
        let mut buffer = [0u8; 8192];
        loop {
            let count = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(_) => break,
            };
            if tx.send(buffer[..count].to_vec()).is_err() {
                break;
            }
        }
    });

    Ok(SpawnedShell {
        child,
        master: pair.master,
        writer,
        reader_rx,
        reader_handle,
        init,
    })
}

fn disable_echo(master: &(dyn MasterPty + Send)) {
    let Some(fd) = master.as_raw_fd() else {
        warn!("pty exposes no fd; command echo will leak into output");
        return;
    };
    unsafe {
        let mut term: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut term) != 0 {
            return;
        }
        term.c_lflag &= !libc::ECHO;
        let _ = libc::tcsetattr(fd, libc::TCSANOW, &term);
    }
}

struct SavedSignals {
    int: libc::sighandler_t,
    pipe: libc::sighandler_t,
}

impl SavedSignals {
    fn reset_for_spawn() -> Self {
        unsafe {
            Self {
                int: libc::signal(libc::SIGINT, libc::SIG_DFL),
                pipe: libc::signal(libc::SIGPIPE, libc::SIG_DFL),
            }
        }
    }

    fn restore(self) {
        unsafe {
            libc::signal(libc::SIGINT, self.int);
            libc::signal(libc::SIGPIPE, self.pipe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_init_file_is_written_and_cleaned_up() {
        let config = ShellConfig::default();
        let init = InitFile::resolve(&config).unwrap();
        let path = init.path().to_path_buf();
        assert!(path.exists());
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("PS1=\"$\""));
        init.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn user_init_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("rc.sh");
        fs::write(&rc, "PS1=\"$\"\n").unwrap();
        let config = ShellConfig {
            init_file: Some(rc.clone()),
            ..ShellConfig::default()
        };
        let init = InitFile::resolve(&config).unwrap();
        assert_eq!(init.path(), rc.as_path());
        init.cleanup();
        assert!(rc.exists());
    }

    #[test]
    fn signal_dispositions_round_trip() {
        let saved = SavedSignals::reset_for_spawn();
        saved.restore();
        // A second save sees whatever restore put back; resetting twice
        // must not wedge the process handlers.
        let again = SavedSignals::reset_for_spawn();
        again.restore();
    }
}
