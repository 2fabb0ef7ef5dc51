//! Native process control shared by the Lifecycle Engine (C10) and the
//! Readiness Watcher (C11): spawn detached, signal a pid group, and
//! check liveness.
use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::sys::stat::Mode;
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Spawns `executable` with `args` in a new session (`setsid`) so the
/// manager can signal the whole process group on stop, detached from
/// this process's controlling terminal. Stdout/stderr are redirected to
/// `log_file`; stdin is wired to `stdin_fifo` when the blueprint defines
/// an interactive command, else `/dev/null`.
pub fn spawn_detached(
    executable: &Path,
    args: &[String],
    cwd: &Path,
    log_file: &Path,
    stdin_fifo: Option<&Path>,
) -> Result<u32> {
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| Error::io("process", e))?;
    let log_err = log.try_clone().map_err(|e| Error::io("process", e))?;

    let mut command = Command::new(executable);
    command
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    match stdin_fifo {
        Some(fifo) => {
            let input = fs::OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(fifo)
                .map_err(|e| Error::io("process", e))?;
            command.stdin(Stdio::from(input));
        }
        None => {
            command.stdin(Stdio::null());
        }
    }

    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let child = command
        .spawn()
        .map_err(|e| Error::dependency("process", format!("{}: {e}", executable.display())))?;
    Ok(child.id())
}

/// Creates a FIFO at `path` if one does not already exist.
pub fn ensure_fifo(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600))
        .map_err(|e| Error::io("process", std::io::Error::from_raw_os_error(e as i32)))
}

pub fn is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn read_pid_file(pid_file: &Path) -> Option<u32> {
    let contents = fs::read_to_string(pid_file).ok()?;
    contents.trim().parse().ok()
}

pub fn write_pid_file(pid_file: &Path, pid: u32) -> Result<()> {
    fs::write(pid_file, pid.to_string()).map_err(|e| Error::io("process", e))
}

pub fn remove_pid_file(pid_file: &Path) -> Result<()> {
    if pid_file.exists() {
        fs::remove_file(pid_file).map_err(|e| Error::io("process", e))?;
    }
    Ok(())
}

/// Sends SIGTERM to the process group led by `pid`.
pub fn terminate_group(pid: u32) -> Result<()> {
    signal::killpg(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| Error::io("process", std::io::Error::from_raw_os_error(e as i32)))
}

/// Sends SIGKILL to the process group led by `pid`.
pub fn kill_group(pid: u32) -> Result<()> {
    signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
        .map_err(|e| Error::io("process", std::io::Error::from_raw_os_error(e as i32)))
}

/// Writes `line` (newline-terminated) to the input FIFO, used for both
/// `save_command`/`stop_command` delivery and `--input <cmd>`.
pub fn write_input_line(input_socket: &Path, line: &str) -> Result<()> {
    use std::io::Write as _;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(input_socket)
        .map_err(|e| Error::io("process", e))?;
    writeln!(file, "{line}").map_err(|e| Error::io("process", e))?;
    Ok(())
}

/// Substitutes `$INSTANCE_*` placeholders used by blueprint
/// `executable_arguments` (spec section 3).
pub fn substitute_placeholders(template: &str, instance: &crate::instance::Instance) -> String {
    template
        .replace("$INSTANCE_NAME", &instance.name)
        .replace("$INSTANCE_INSTALL_DIR", &instance.install_dir.to_string_lossy())
        .replace("$INSTANCE_SAVES_DIR", &instance.saves_dir.to_string_lossy())
        .replace("$INSTANCE_LOGS_DIR", &instance.logs_dir.to_string_lossy())
        .replace("$INSTANCE_WORKING_DIR", &instance.working_dir.to_string_lossy())
}

pub fn resolve_executable(install_dir: &Path, subdirectory: Option<&str>, executable_file: &str) -> PathBuf {
    let base = match subdirectory {
        Some(sub) => install_dir.join(sub),
        None => install_dir.to_path_buf(),
    };
    base.join(executable_file)
}
