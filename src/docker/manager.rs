//! Per-mode container lifecycle manager.
//!
//! One runtime per tool family keeps at most one live container per compute
//! mode. Containers are started through a rendered compose file, execed
//! into with an allocated TTY so the tool renders its progress, and stopped
//! by a background watcher once idle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::LangkitError;
use crate::models::ToolFamily;
use crate::progress::ProgressReporter;
use crate::Result;

use super::{bar_prefix, image_for, is_gpu_runtime_error, ComputeMode, PullProgressParser};

/// Wait after `up -d` before accepting execs; the daemon reports "running"
/// slightly before the container accepts exec sessions.
const START_SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Cadence of the idle watcher.
const WATCHER_CADENCE: Duration = Duration::from_secs(5 * 60);

/// Options for [`ContainerRuntime::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerOptions {
    /// Stop any existing container for the mode and start a fresh one.
    pub recreate: bool,
}

/// A live container for one compute mode.
pub struct ContainerHandle {
    project: String,
    container_name: String,
    compose_file: PathBuf,
    mode: ComputeMode,
    last_used: StdMutex<Instant>,
    active_execs: AtomicUsize,
}

impl ContainerHandle {
    /// Container name as known to the docker daemon.
    pub fn name(&self) -> &str {
        &self.container_name
    }

    /// Compute mode of this container.
    pub fn mode(&self) -> ComputeMode {
        self.mode
    }

    /// Refresh the last-used timestamp.
    pub fn touch(&self) {
        *self.last_used.lock().unwrap() = Instant::now();
    }

    /// Time since the last exec or get.
    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().unwrap().elapsed()
    }

    /// Whether an exec session is currently attached.
    pub fn has_active_exec(&self) -> bool {
        self.active_execs.load(Ordering::SeqCst) > 0
    }
}

/// Keeps the exec refcount honest even when an exec future is dropped.
struct ExecGuard<'a>(&'a ContainerHandle);

impl<'a> ExecGuard<'a> {
    fn new(handle: &'a ContainerHandle) -> Self {
        handle.active_execs.fetch_add(1, Ordering::SeqCst);
        handle.touch();
        Self(handle)
    }
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.0.active_execs.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

/// Result of an exec: merged output plus the exit code.
///
/// A non-zero exit is not an error here; callers inspect the output to
/// classify failures (CUDA OOM, missing model, crash).
#[derive(Debug)]
pub struct ExecOutput {
    /// Interleaved stdout followed by stderr.
    pub combined: String,
    /// Process exit code, -1 when terminated by signal.
    pub exit_code: i32,
}

/// Lifecycle manager for one tool family.
pub struct ContainerRuntime {
    tool: ToolFamily,
    config_root: PathBuf,
    idle_timeout: Duration,
    handles: Mutex<HashMap<ComputeMode, Arc<ContainerHandle>>>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
}

impl ContainerRuntime {
    /// Create the runtime and start its idle watcher.
    pub fn new(tool: ToolFamily, config_root: PathBuf, idle_timeout: Duration) -> Arc<Self> {
        let runtime = Arc::new(Self {
            tool,
            config_root,
            idle_timeout,
            handles: Mutex::new(HashMap::new()),
            watcher: StdMutex::new(None),
        });
        let weak = Arc::downgrade(&runtime);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHER_CADENCE);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(runtime) => runtime.evict_idle().await,
                    None => break,
                }
            }
        });
        *runtime.watcher.lock().unwrap() = Some(handle);
        runtime
    }

    /// Tool family this runtime serves.
    pub fn tool(&self) -> ToolFamily {
        self.tool
    }

    /// Host directory exchanged with the container at `/data/exchange`.
    pub fn exchange_dir(&self) -> PathBuf {
        self.config_root
            .join("docker")
            .join(bar_prefix(self.tool))
            .join("exchange")
    }

    /// Path of the exchange dir as seen from inside the container.
    pub fn container_exchange_dir(&self) -> &'static str {
        "/data/exchange"
    }

    fn compose_dir(&self) -> PathBuf {
        self.config_root.join("docker").join(bar_prefix(self.tool))
    }

    fn compose_file(&self, mode: ComputeMode) -> PathBuf {
        self.compose_dir()
            .join(format!("compose-{}.yml", mode.suffix()))
    }

    fn project_name(&self, mode: ComputeMode) -> String {
        format!("langkit-{}-{}", bar_prefix(self.tool), mode.suffix())
    }

    fn render_compose(&self, mode: ComputeMode) -> String {
        let image = image_for(self.tool);
        let models_dir = self.config_root.join(self.tool.dir_name());
        let mut yaml = format!(
            "services:\n  {service}:\n    image: {image}\n    container_name: {name}\n    entrypoint: [\"sleep\", \"infinity\"]\n    volumes:\n      - \"{models}:{container_models}\"\n      - \"{exchange}:/data/exchange\"\n",
            service = bar_prefix(self.tool),
            image = image.reference,
            name = self.project_name(mode),
            models = models_dir.to_string_lossy(),
            container_models = self.tool.container_model_dir(),
            exchange = self.exchange_dir().to_string_lossy(),
        );
        if mode == ComputeMode::Gpu {
            yaml.push_str(
                "    deploy:\n      resources:\n        reservations:\n          devices:\n            - driver: nvidia\n              count: all\n              capabilities: [gpu]\n",
            );
        }
        yaml
    }

    /// Get (or create) the container for a mode.
    ///
    /// Holds the per-runtime lock for the whole start so there is never more
    /// than one live container per mode.
    pub async fn get(
        &self,
        mode: ComputeMode,
        options: ContainerOptions,
        reporter: &ProgressReporter,
    ) -> Result<Arc<ContainerHandle>> {
        let mut handles = self.handles.lock().await;

        if let Some(existing) = handles.get(&mode).cloned() {
            if options.recreate {
                info!("recreating {} container", existing.container_name);
                self.compose_down(&existing).await;
                handles.remove(&mode);
            } else {
                existing.touch();
                return Ok(existing);
            }
        }

        self.ensure_image(reporter).await?;

        std::fs::create_dir_all(self.compose_dir())?;
        std::fs::create_dir_all(self.exchange_dir())?;
        std::fs::create_dir_all(self.config_root.join(self.tool.dir_name()))?;
        let compose_file = self.compose_file(mode);
        std::fs::write(&compose_file, self.render_compose(mode))?;

        let project = self.project_name(mode);
        self.compose_up(&project, &compose_file).await?;

        // Known race between "running" and "exec-accepting".
        tokio::time::sleep(START_SETTLE_DELAY).await;

        let handle = Arc::new(ContainerHandle {
            container_name: project.clone(),
            project,
            compose_file,
            mode,
            last_used: StdMutex::new(Instant::now()),
            active_execs: AtomicUsize::new(0),
        });
        handles.insert(mode, handle.clone());
        Ok(handle)
    }

    /// Run a command inside the container, streaming output chunks.
    ///
    /// `tty` allocates a pseudo-terminal so progress libraries render
    /// percentages; `COLUMNS` should be set via `env` in that case.
    pub async fn exec(
        &self,
        handle: &ContainerHandle,
        cmd: &[&str],
        env: &[(&str, &str)],
        tty: bool,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<ExecOutput> {
        let _guard = ExecGuard::new(handle);

        let mut command = Command::new("docker");
        command.arg("exec");
        if tty {
            command.arg("-t");
        }
        for (key, value) in env {
            command.arg("-e").arg(format!("{}={}", key, value));
        }
        command.arg(&handle.container_name).args(cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("exec in {}: {:?}", handle.container_name, cmd);
        let mut child = command
            .spawn()
            .map_err(|e| LangkitError::container(format!("docker exec failed to spawn: {}", e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| LangkitError::container("docker exec stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| LangkitError::container("docker exec stderr unavailable"))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut combined = String::new();
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    stderr_task.abort();
                    return Err(LangkitError::Cancelled);
                }
                read = stdout.read(&mut buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                            on_chunk(&chunk);
                            combined.push_str(&chunk);
                        }
                        Err(e) => {
                            let _ = child.start_kill();
                            return Err(LangkitError::container(format!(
                                "exec stream read failed: {}",
                                e
                            )));
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();
        if is_gpu_runtime_error(&stderr_output) {
            return Err(LangkitError::gpu_unavailable());
        }
        combined.push_str(&stderr_output);
        Ok(ExecOutput {
            combined,
            exit_code: status.code().unwrap_or(-1),
        })
    }

    /// Stop and release the container for a mode, if any.
    pub async fn stop(&self, mode: ComputeMode) {
        let removed = self.handles.lock().await.remove(&mode);
        if let Some(handle) = removed {
            self.compose_down(&handle).await;
        }
    }

    /// Stop every container and the idle watcher.
    pub async fn close(&self) {
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.abort();
        }
        let drained: Vec<_> = self.handles.lock().await.drain().collect();
        for (_, handle) in drained {
            self.compose_down(&handle).await;
        }
    }

    async fn evict_idle(&self) {
        let mut handles = self.handles.lock().await;
        let expired: Vec<ComputeMode> = handles
            .iter()
            .filter(|(_, h)| h.idle_for() > self.idle_timeout && !h.has_active_exec())
            .map(|(mode, _)| *mode)
            .collect();
        for mode in expired {
            if let Some(handle) = handles.remove(&mode) {
                info!(
                    "stopping idle container {} after {:?}",
                    handle.container_name,
                    handle.idle_for()
                );
                self.compose_down(&handle).await;
            }
        }
    }

    async fn ensure_image(&self, reporter: &ProgressReporter) -> Result<()> {
        let image = image_for(self.tool);
        let inspect = Command::new("docker")
            .args(["image", "inspect", image.reference])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| LangkitError::container(format!("failed to launch docker: {}", e)))?;
        if inspect.success() {
            return Ok(());
        }

        info!("pulling {}", image.reference);
        let bar_id = format!("{}-pull", bar_prefix(self.tool));
        let mut child = Command::new("docker")
            .args(["pull", image.reference])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LangkitError::container(format!("docker pull failed to spawn: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LangkitError::container("docker pull stdout unavailable"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = PullProgressParser::new(image.declared_size_bytes);
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(update) = parser.feed_line(&line) {
                reporter.update(
                    &bar_id,
                    update.percent,
                    100,
                    "image-pull",
                    update.phase.description(),
                );
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LangkitError::container(format!("docker pull wait failed: {}", e)))?;
        if !output.status.success() {
            return Err(LangkitError::container(format!(
                "docker pull of {} failed: {}",
                image.reference,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn compose_up(&self, project: &str, compose_file: &PathBuf) -> Result<()> {
        let file_arg = compose_file.to_string_lossy();
        let output = Command::new("docker")
            .args(["compose", "-p", project, "-f", file_arg.as_ref(), "up", "-d"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LangkitError::container(format!("docker compose failed to spawn: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_gpu_runtime_error(&stderr) {
                return Err(LangkitError::gpu_unavailable());
            }
            return Err(LangkitError::container(format!(
                "docker compose up failed for {}: {}",
                project, stderr
            )));
        }
        Ok(())
    }

    async fn compose_down(&self, handle: &ContainerHandle) {
        let file_arg = handle.compose_file.to_string_lossy();
        let result = Command::new("docker")
            .args(["compose", "-p", handle.project.as_str(), "-f", file_arg.as_ref(), "down"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        match result {
            Ok(output) if !output.status.success() => warn!(
                "docker compose down failed for {}: {}",
                handle.project,
                String::from_utf8_lossy(&output.stderr)
            ),
            Err(e) => warn!("docker compose down failed for {}: {}", handle.project, e),
            _ => {}
        }
    }
}
