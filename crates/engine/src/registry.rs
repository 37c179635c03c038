//! Managed application registry
//!
//! Tracks processes the engine launched or adopted, keyed by logical name.
//! Window handles and process liveness are re-checked on every resolve; the
//! registry never trusts cached state across an await point.

use crate::gate::CaptureGate;
use crate::platform::Desktop;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uidriver_common::{
    await_condition_cancellable, AppState, Backoff, EngineConfig, Error, Point, Probe,
    ProcessMatcher, Rect, Result, WaitPolicy, WindowHandle, WindowInfo,
};

/// How to start a process that the registry will own
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// When set, the main window is the first visible window whose title
    /// contains this substring; otherwise the first visible window wins.
    pub window_title_hint: Option<String>,
}

impl LaunchSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            window_title_hint: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_title_hint(mut self, hint: impl Into<String>) -> Self {
        self.window_title_hint = Some(hint.into());
        self
    }
}

/// Snapshot of one managed application
#[derive(Debug, Clone, Serialize)]
pub struct ManagedApp {
    pub name: String,
    pub pid: u32,
    pub state: AppState,
    pub main_window: Option<WindowInfo>,
    /// Whether the registry spawned this process (and may reap it)
    pub owned: bool,
    pub registered_at: i64,
}

struct AppEntry {
    data: RwLock<ManagedApp>,
    /// Present only for processes the registry spawned
    child: Mutex<Option<Child>>,
    /// Serializes facade operations against this app
    op_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Registry of managed applications, keyed by caller-chosen logical name
pub struct AppRegistry {
    desktop: Arc<dyn Desktop>,
    config: EngineConfig,
    apps: RwLock<HashMap<String, Arc<AppEntry>>>,
    system: Mutex<System>,
    gate: CaptureGate,
    cancel: CancellationToken,
}

impl AppRegistry {
    pub fn new(desktop: Arc<dyn Desktop>, config: EngineConfig, gate: CaptureGate) -> Self {
        Self {
            desktop,
            config,
            apps: RwLock::new(HashMap::new()),
            system: Mutex::new(System::new()),
            gate,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all in-flight waits. Entries stay registered; `terminate` or
    /// `Drop` still reaps owned processes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Spawn a process and wait for its main window to appear.
    ///
    /// The entry is registered in `Launching` state for the duration of the
    /// window wait. If the process exits first, or no matching visible window
    /// appears within the launch timeout, the entry is evicted and the
    /// process reaped.
    pub async fn launch(&self, name: &str, spec: LaunchSpec) -> Result<ManagedApp> {
        if self.apps.read().contains_key(name) {
            return Err(Error::Registration(format!(
                "'{name}' is already registered"
            )));
        }

        info!("Launching '{}' from {}", name, spec.executable.display());
        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        let child = command.spawn().map_err(|e| {
            Error::Launch(format!(
                "failed to spawn {}: {e}",
                spec.executable.display()
            ))
        })?;
        let pid = child.id();

        let entry = Arc::new(AppEntry {
            data: RwLock::new(ManagedApp {
                name: name.to_string(),
                pid,
                state: AppState::Launching,
                main_window: None,
                owned: true,
                registered_at: chrono::Utc::now().timestamp(),
            }),
            child: Mutex::new(Some(child)),
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
        });

        {
            let mut apps = self.apps.write();
            if apps.contains_key(name) {
                if let Some(mut c) = entry.child.lock().take() {
                    let _ = c.kill();
                    let _ = c.wait();
                }
                return Err(Error::Registration(format!(
                    "'{name}' is already registered"
                )));
            }
            apps.insert(name.to_string(), entry.clone());
        }

        let policy = WaitPolicy::new(self.config.window_timeout(), self.config.poll_interval());
        let desktop = self.desktop.clone();
        let hint = spec.window_title_hint.clone();
        let probe_entry = entry.clone();
        let window = await_condition_cancellable(policy, &self.cancel, move || {
            let desktop = desktop.clone();
            let hint = hint.clone();
            let entry = probe_entry.clone();
            async move {
                if let Some(status) = entry
                    .child
                    .lock()
                    .as_mut()
                    .and_then(|c| c.try_wait().ok().flatten())
                {
                    return Err(Error::Launch(format!(
                        "process exited ({status}) before showing a window"
                    )));
                }
                let windows = desktop.windows_of_pid(pid)?;
                let candidate = windows
                    .iter()
                    .find(|w| {
                        w.visible
                            && hint
                                .as_deref()
                                .map_or(true, |h| w.title.contains(h))
                    })
                    .cloned();
                match candidate {
                    Some(w) => Ok(Probe::Ready(w)),
                    None => Ok(Probe::pending(format!(
                        "{} window(s) for pid {pid}, none matching",
                        windows.len()
                    ))),
                }
            }
        })
        .await;

        match window {
            Ok(window) => {
                info!("'{}' running as pid {} (window {})", name, pid, window.handle);
                let mut data = entry.data.write();
                data.state = AppState::Running;
                data.main_window = Some(window);
                Ok(data.clone())
            }
            Err(e) => {
                self.apps.write().remove(name);
                if let Some(mut c) = entry.child.lock().take() {
                    let _ = c.kill();
                    let _ = c.wait();
                }
                match e {
                    Error::Timeout { elapsed, last_observed, .. } => Err(Error::Launch(format!(
                        "no visible window for pid {pid} within {elapsed:?}{}",
                        last_observed
                            .map(|o| format!(" ({o})"))
                            .unwrap_or_default()
                    ))),
                    other => Err(other),
                }
            }
        }
    }

    /// Adopt an already-running process under a logical name.
    ///
    /// Matching by executable name with more than one live candidate is an
    /// error unless `newest` resolves the ambiguity by start time.
    pub fn register_existing(&self, name: &str, matcher: ProcessMatcher) -> Result<ManagedApp> {
        if self.apps.read().contains_key(name) {
            return Err(Error::Registration(format!(
                "'{name}' is already registered"
            )));
        }

        let pid = self.resolve_pid(&matcher)?;
        let main_window = self
            .desktop
            .windows_of_pid(pid)?
            .into_iter()
            .find(|w| w.visible);

        let app = ManagedApp {
            name: name.to_string(),
            pid,
            state: AppState::Running,
            main_window,
            owned: false,
            registered_at: chrono::Utc::now().timestamp(),
        };
        info!("Registered existing pid {} as '{}'", pid, name);

        let entry = Arc::new(AppEntry {
            data: RwLock::new(app.clone()),
            child: Mutex::new(None),
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
        });
        let mut apps = self.apps.write();
        if apps.contains_key(name) {
            return Err(Error::Registration(format!(
                "'{name}' is already registered"
            )));
        }
        apps.insert(name.to_string(), entry);
        Ok(app)
    }

    fn resolve_pid(&self, matcher: &ProcessMatcher) -> Result<u32> {
        let mut system = self.system.lock();
        system.refresh_processes();
        match matcher {
            ProcessMatcher::Pid(pid) => {
                if system.process(Pid::from_u32(*pid)).is_some() {
                    Ok(*pid)
                } else {
                    Err(Error::Registration(format!("no live process with pid {pid}")))
                }
            }
            ProcessMatcher::ExecutableName { name, newest } => {
                let mut candidates: Vec<_> = system
                    .processes()
                    .values()
                    .filter(|p| p.name() == name)
                    .collect();
                if candidates.is_empty() {
                    return Err(Error::Registration(format!("no process named '{name}'")));
                }
                if candidates.len() > 1 && !newest {
                    return Err(Error::Registration(format!(
                        "{} processes named '{name}'; use newest or a pid",
                        candidates.len()
                    )));
                }
                candidates.sort_by_key(|p| p.start_time());
                Ok(candidates
                    .last()
                    .map(|p| p.pid().as_u32())
                    .unwrap_or_default())
            }
        }
    }

    fn entry(&self, name: &str) -> Result<Arc<AppEntry>> {
        self.apps
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub(crate) fn op_lock(&self, name: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        Ok(self.entry(name)?.op_lock.clone())
    }

    pub(crate) fn desktop(&self) -> &Arc<dyn Desktop> {
        &self.desktop
    }

    fn process_alive(&self, entry: &AppEntry, pid: u32) -> bool {
        {
            let mut child = entry.child.lock();
            if let Some(c) = child.as_mut() {
                return matches!(c.try_wait(), Ok(None));
            }
        }
        let mut system = self.system.lock();
        system.refresh_processes();
        system.process(Pid::from_u32(pid)).is_some()
    }

    /// Refresh and return the current snapshot for `name`.
    ///
    /// A dead process is evicted here and reported as `NotFound`; a window
    /// whose handle stopped resolving is replaced by the next visible window
    /// of the same pid. Hung windows move the app to `Suspended` until the
    /// OS reports it responsive again.
    pub fn resolve(&self, name: &str) -> Result<ManagedApp> {
        let entry = self.entry(name)?;
        let pid = entry.data.read().pid;

        if !self.process_alive(&entry, pid) {
            warn!("'{}' (pid {}) has exited; evicting", name, pid);
            {
                let mut data = entry.data.write();
                data.state = AppState::Terminated;
                data.main_window = None;
            }
            self.apps.write().remove(name);
            if let Some(mut c) = entry.child.lock().take() {
                let _ = c.wait();
            }
            return Err(Error::NotFound(name.to_string()));
        }

        let mut data = entry.data.write();
        let handle = data.main_window.as_ref().map(|w| w.handle);
        match handle {
            Some(handle) => match self.desktop.window_info(handle) {
                Ok(info) => data.main_window = Some(info),
                Err(Error::WindowGone(_)) => {
                    debug!("main window of '{}' closed; re-resolving", name);
                    data.main_window = self
                        .desktop
                        .windows_of_pid(pid)
                        .ok()
                        .and_then(|ws| ws.into_iter().find(|w| w.visible));
                }
                // enumeration hiccup; keep the stale metadata for now
                Err(_) => {}
            },
            None => {
                data.main_window = self
                    .desktop
                    .windows_of_pid(pid)
                    .ok()
                    .and_then(|ws| ws.into_iter().find(|w| w.visible));
            }
        }

        if data.state != AppState::Launching {
            let hung = data
                .main_window
                .as_ref()
                .map(|w| self.desktop.is_hung(w.handle).unwrap_or(false))
                .unwrap_or(false);
            let next = if hung {
                AppState::Suspended
            } else {
                AppState::Running
            };
            if data.state != next && data.state.can_transition_to(next) {
                debug!("'{}' {} -> {}", name, data.state, next);
                data.state = next;
            }
        }

        Ok(data.clone())
    }

    /// Current main window, freshly resolved
    pub fn main_window(&self, name: &str) -> Result<WindowInfo> {
        let app = self.resolve(name)?;
        app.main_window
            .ok_or_else(|| Error::WindowOperation(format!("'{name}' has no visible window")))
    }

    pub fn list(&self) -> Vec<ManagedApp> {
        self.apps
            .read()
            .values()
            .map(|e| e.data.read().clone())
            .collect()
    }

    /// Visible windows of the app other than its main window (dialogs,
    /// popups, tool windows)
    pub fn list_secondary_windows(&self, name: &str) -> Result<Vec<WindowInfo>> {
        let app = self.resolve(name)?;
        let main = app.main_window.as_ref().map(|w| w.handle);
        let mut windows = self.desktop.windows_of_pid(app.pid)?;
        windows.retain(|w| w.visible && Some(w.handle) != main);
        Ok(windows)
    }

    fn verify_policy(&self) -> WaitPolicy {
        let backoff = if self.config.wait.exponential_backoff {
            Backoff::Exponential
        } else {
            Backoff::Fixed
        };
        WaitPolicy::new(self.config.default_timeout(), self.config.poll_interval())
            .with_max_retries(self.config.wait.max_retries)
            .with_backoff(backoff)
    }

    /// Bring the app's main window to the foreground and verify it got
    /// there. Focus requests are refused transiently by some window managers
    /// (foreground lock), so the request itself is retried, not just the
    /// verification.
    pub async fn focus(&self, name: &str) -> Result<()> {
        let window = self.main_window(name)?;
        let desktop = self.desktop.clone();
        await_condition_cancellable(self.verify_policy(), &self.cancel, move || {
            let desktop = desktop.clone();
            async move {
                desktop.focus_window(window.handle)?;
                let info = desktop.window_info(window.handle)?;
                if info.focused {
                    Ok(Probe::Ready(()))
                } else {
                    Ok(Probe::pending("focus accepted but window not foreground"))
                }
            }
        })
        .await?;
        debug!("'{}' focused", name);
        Ok(())
    }

    /// Restore if minimized, then focus
    pub async fn switch_to(&self, name: &str) -> Result<()> {
        let window = self.main_window(name)?;
        if window.minimized {
            self.desktop.restore_window(window.handle)?;
        }
        self.focus(name).await
    }

    /// Move/resize the main window and verify the frame took effect.
    /// Captures are held off for the duration so no screenshot sees a
    /// half-moved window.
    pub async fn set_frame(&self, name: &str, frame: Rect) -> Result<()> {
        let window = self.main_window(name)?;
        let _quiesce = self.gate.mutate().await;
        self.desktop.set_window_frame(window.handle, frame)?;
        let desktop = self.desktop.clone();
        await_condition_cancellable(self.verify_policy(), &self.cancel, move || {
            let desktop = desktop.clone();
            async move {
                let info = desktop.window_info(window.handle)?;
                if info.rect == frame {
                    Ok(Probe::Ready(()))
                } else {
                    Ok(Probe::pending(format!("frame still {:?}", info.rect)))
                }
            }
        })
        .await
    }

    /// Move without resizing
    pub async fn move_window(&self, name: &str, to: Point) -> Result<()> {
        let current = self.main_window(name)?.rect;
        self.set_frame(name, Rect::new(to.x, to.y, current.width, current.height))
            .await
    }

    /// Resize in place
    pub async fn resize(&self, name: &str, width: u32, height: u32) -> Result<()> {
        let current = self.main_window(name)?.rect;
        self.set_frame(name, Rect::new(current.x, current.y, width, height))
            .await
    }

    pub async fn minimize(&self, name: &str) -> Result<()> {
        let window = self.main_window(name)?;
        let _quiesce = self.gate.mutate().await;
        self.desktop.set_minimized(window.handle, true)?;
        self.verify_presentation(window.handle, true, None).await
    }

    pub async fn maximize(&self, name: &str) -> Result<()> {
        let window = self.main_window(name)?;
        let _quiesce = self.gate.mutate().await;
        self.desktop.set_maximized(window.handle, true)?;
        self.verify_presentation(window.handle, false, Some(true))
            .await
    }

    pub async fn restore(&self, name: &str) -> Result<()> {
        let window = self.main_window(name)?;
        let _quiesce = self.gate.mutate().await;
        self.desktop.restore_window(window.handle)?;
        self.verify_presentation(window.handle, false, Some(false))
            .await
    }

    /// Wait until the window reports the requested presentation state.
    /// `maximized` is checked only when the operation pins it; minimize
    /// leaves the zoomed flag alone so a later restore returns to it.
    async fn verify_presentation(
        &self,
        handle: WindowHandle,
        minimized: bool,
        maximized: Option<bool>,
    ) -> Result<()> {
        let desktop = self.desktop.clone();
        await_condition_cancellable(self.verify_policy(), &self.cancel, move || {
            let desktop = desktop.clone();
            async move {
                let info = desktop.window_info(handle)?;
                let settled = info.minimized == minimized
                    && maximized.map_or(true, |m| info.maximized == m);
                if settled {
                    Ok(Probe::Ready(()))
                } else {
                    Ok(Probe::pending(format!(
                        "minimized = {}, maximized = {}",
                        info.minimized, info.maximized
                    )))
                }
            }
        })
        .await
    }

    /// Terminate an app: close signal first, forced kill after the grace
    /// period. Always evicts the entry. Terminating an unknown name is a
    /// no-op so shutdown paths can call it unconditionally.
    pub async fn terminate(&self, name: &str) -> Result<()> {
        let Some(entry) = self.apps.read().get(name).cloned() else {
            debug!("terminate('{}') with nothing registered; no-op", name);
            return Ok(());
        };
        let _op = entry.op_lock.lock().await;

        let (pid, window) = {
            let data = entry.data.read();
            (data.pid, data.main_window.clone())
        };
        info!("Terminating '{}' (pid {})", name, pid);

        if self.process_alive(&entry, pid) {
            if let Some(w) = &window {
                if let Err(e) = self.desktop.request_close(w.handle) {
                    debug!("close request for '{}' failed: {}", name, e);
                }
            }

            let poll = self.config.poll_interval().min(Duration::from_millis(100));
            let policy = WaitPolicy::new(self.config.grace_timeout(), poll);
            let probe_entry = entry.clone();
            let graceful = await_condition_cancellable(policy, &CancellationToken::new(), move || {
                let entry = probe_entry.clone();
                async move {
                    if self.process_alive(&entry, pid) {
                        Ok(Probe::Pending(None))
                    } else {
                        Ok(Probe::Ready(()))
                    }
                }
            })
            .await;

            if graceful.is_err() {
                warn!("'{}' ignored close request; killing pid {}", name, pid);
                let killed_via_child = {
                    let mut child = entry.child.lock();
                    match child.as_mut() {
                        Some(c) => c.kill().is_ok(),
                        None => false,
                    }
                };
                if !killed_via_child {
                    let mut system = self.system.lock();
                    system.refresh_processes();
                    if let Some(p) = system.process(Pid::from_u32(pid)) {
                        p.kill();
                    }
                }
            }
        }

        if let Some(mut c) = entry.child.lock().take() {
            let _ = c.wait();
        }
        {
            let mut data = entry.data.write();
            data.state = AppState::Terminated;
            data.main_window = None;
        }
        self.apps.write().remove(name);
        Ok(())
    }

    /// Terminate everything still registered. Individual failures are logged
    /// and do not stop the sweep.
    pub async fn terminate_all(&self) {
        let names: Vec<String> = self.apps.read().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.terminate(&name).await {
                warn!("failed to terminate '{}': {}", name, e);
            }
        }
    }
}

impl Drop for AppRegistry {
    fn drop(&mut self) {
        for (name, entry) in self.apps.get_mut().drain() {
            if let Some(mut child) = entry.child.lock().take() {
                debug!("reaping still-owned '{}' on registry drop", name);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
