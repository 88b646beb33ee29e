use anyhow::{Result, bail};
use std::{
    env,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Make sure testcontainers can reach a container runtime.
///
/// An explicit `DOCKER_HOST` wins, then the Docker socket, then a Podman
/// socket (exported as `DOCKER_HOST`). Detection runs once per process.
///
/// # Errors
/// Returns an error if no reachable runtime socket is found.
pub fn ensure_container_runtime() -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match INIT.get_or_init(detect_runtime) {
        Ok(()) => Ok(()),
        Err(message) => bail!("{message}"),
    }
}

fn detect_runtime() -> Result<(), String> {
    if let Ok(docker_host) = env::var("DOCKER_HOST") {
        let socket = docker_host
            .strip_prefix("unix://")
            .unwrap_or(docker_host.as_str());
        if !socket.starts_with('/') || wait_for_socket(Path::new(socket)) {
            return Ok(());
        }
        return Err(format!(
            "`DOCKER_HOST` points to `{docker_host}`, but nothing is listening there"
        ));
    }

    if wait_for_socket(Path::new("/var/run/docker.sock")) {
        return Ok(());
    }

    if let Some(socket) = podman_sockets().into_iter().find(|path| wait_for_socket(path)) {
        env::set_var("DOCKER_HOST", format!("unix://{}", socket.display()));
        return Ok(());
    }

    Err("No container runtime found: start Docker or `podman.socket`, or set `DOCKER_HOST`"
        .to_string())
}

fn podman_sockets() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(PathBuf::from(runtime_dir).join("podman/podman.sock"));
    }
    candidates.push(PathBuf::from("/run/podman/podman.sock"));
    candidates
}

fn wait_for_socket(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let start = Instant::now();
    while start.elapsed() < SOCKET_WAIT_TIMEOUT {
        if UnixStream::connect(path).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(200));
    }
    false
}
