//! Command delivery by temporary script injection.
//!
//! The command text is never typed into the terminal. It is written to a
//! freshly created executable script and only the script path is sent, so
//! quoting, multi-line input and special characters in the command cannot
//! be mangled by the interactive shell. The script removes itself on exit.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use shellbridge_control::TerminalControl;
use shellbridge_core::{DispatchSettings, Error, Result, SecuritySettings};

/// A command submission.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// Command text, possibly multi-line
    pub command: String,
    /// Directory to run in
    pub working_directory: Option<String>,
    /// Whether the destructive-command gate applies
    pub require_confirmation: bool,
    /// Wrap the output in begin/end marker lines
    pub isolate: bool,
}

/// Begin/end marker lines that bracket a command's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    /// Printed before the command runs
    pub begin: String,
    /// Printed when the script exits
    pub end: String,
}

impl Sentinels {
    /// Markers for correlation id `id`.
    pub fn for_id(id: &str) -> Self {
        Self {
            begin: format!("__SHELLBRIDGE_BEGIN_{id}__"),
            end: format!("__SHELLBRIDGE_END_{id}__"),
        }
    }
}

/// Validates commands and stages them as scripts.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    security: SecuritySettings,
    settings: DispatchSettings,
}

impl CommandDispatcher {
    /// Create a dispatcher.
    pub fn new(security: SecuritySettings, settings: DispatchSettings) -> Self {
        Self { security, settings }
    }

    /// Reject unconfirmed destructive commands.
    pub fn check_policy(&self, command: &str, require_confirmation: bool) -> Result<()> {
        if !require_confirmation {
            return Ok(());
        }

        match self.security.destructive_match(command) {
            Some(pattern) => {
                warn!("Blocked destructive command matching '{}'", pattern);
                Err(Error::DestructiveCommandBlocked {
                    pattern: pattern.to_string(),
                    command: command.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Validate the request and stage its script.
    ///
    /// Nothing is written when the policy gate rejects the command.
    pub fn prepare(&self, request: &DispatchRequest) -> Result<DispatchedCommand> {
        self.check_policy(&request.command, request.require_confirmation)?;

        let working_directory = request
            .working_directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(resolve_working_directory)
            .transpose()?;

        let id = Uuid::new_v4().simple().to_string();
        let sentinels = request.isolate.then(|| Sentinels::for_id(&id));

        let script = self.stage(
            &request.command,
            working_directory.as_deref(),
            sentinels.as_ref(),
        )?;
        debug!("Staged command {} at {}", id, script.path.display());

        Ok(DispatchedCommand {
            id,
            command: request.command.clone(),
            working_directory,
            sentinels,
            script,
            delivered: false,
        })
    }

    fn stage(
        &self,
        command: &str,
        working_directory: Option<&Path>,
        sentinels: Option<&Sentinels>,
    ) -> Result<StagedScript> {
        let dir = self.settings.script_dir();
        let file = tempfile::Builder::new()
            .prefix(&self.settings.script_prefix)
            .suffix(".sh")
            .tempfile_in(&dir)
            .map_err(|e| {
                Error::Dispatch(format!("Failed to create script in {}: {e}", dir.display()))
            })?;

        let (mut handle, path) = file
            .keep()
            .map_err(|e| Error::Dispatch(format!("Failed to keep script: {e}")))?;
        // Removed again on any early return below
        let script = StagedScript::new(path);

        let contents = render_script(
            &self.settings.interpreter,
            &script.path,
            working_directory,
            command,
            sentinels,
        );
        handle
            .write_all(contents.as_bytes())
            .and_then(|_| handle.flush())
            .map_err(|e| Error::Dispatch(format!("Failed to write script: {e}")))?;
        // The handle must be closed before the script is executed
        drop(handle);

        fs::set_permissions(&script.path, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::Dispatch(format!("Failed to make script executable: {e}")))?;

        Ok(script)
    }
}

/// Script file owned until it has been handed to the shell.
#[derive(Debug)]
struct StagedScript {
    path: PathBuf,
    armed: bool,
}

impl StagedScript {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// The shell owns the file from now on; its exit trap removes it.
    fn release(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed undelivered script {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove script {}: {}", self.path.display(), e),
        }
    }
}

/// A staged command, ready to be delivered exactly once.
#[derive(Debug)]
pub struct DispatchedCommand {
    id: String,
    command: String,
    working_directory: Option<PathBuf>,
    sentinels: Option<Sentinels>,
    script: StagedScript,
    delivered: bool,
}

impl DispatchedCommand {
    /// Correlation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Command text as submitted.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Resolved working directory.
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Marker lines, when isolation was requested.
    pub fn sentinels(&self) -> Option<&Sentinels> {
        self.sentinels.as_ref()
    }

    /// Location of the staged script.
    pub fn script_path(&self) -> &Path {
        &self.script.path
    }

    /// Whether the invocation has been sent.
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    /// The line typed into the terminal.
    pub fn invocation(&self) -> String {
        format!("{}\n", quote_if_needed(&self.script.path.to_string_lossy()))
    }

    /// Type the invocation into `session_id`.
    pub async fn deliver(&mut self, control: &dyn TerminalControl, session_id: &str) -> Result<()> {
        if self.delivered {
            return Err(Error::Dispatch(format!(
                "command {} was already delivered",
                self.id
            )));
        }

        control
            .send_text(session_id, &self.invocation())
            .await
            .map_err(|e| match e {
                Error::Unsupported(msg) => Error::Unsupported(msg),
                other => Error::Dispatch(format!("Failed to send command: {other}")),
            })?;

        self.delivered = true;
        self.script.release();
        debug!("Delivered command {} to {}", self.id, session_id);
        Ok(())
    }
}

/// Build the script text.
fn render_script(
    interpreter: &str,
    path: &Path,
    working_directory: Option<&Path>,
    command: &str,
    sentinels: Option<&Sentinels>,
) -> String {
    let mut script = format!("#!{interpreter}\n");

    script.push_str("shellbridge_exit() {\n");
    if let Some(sentinels) = sentinels {
        script.push_str(&format!("  echo {}\n", shell_quote(&sentinels.end)));
    }
    script.push_str(&format!(
        "  rm -f -- {}\n",
        shell_quote(&path.to_string_lossy())
    ));
    script.push_str("}\ntrap shellbridge_exit EXIT\n");

    if let Some(sentinels) = sentinels {
        script.push_str(&format!("echo {}\n", shell_quote(&sentinels.begin)));
    }
    if let Some(dir) = working_directory {
        script.push_str(&format!(
            "cd {} || exit 1\n",
            shell_quote(&dir.to_string_lossy())
        ));
    }

    script.push_str(command);
    if !command.ends_with('\n') {
        script.push('\n');
    }
    script
}

/// Quote a string for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote only when the string contains characters the shell would interpret.
pub fn quote_if_needed(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./+,:@%=".contains(c));
    if safe {
        s.to_string()
    } else {
        shell_quote(s)
    }
}

/// Expand `~`, make absolute and normalize without touching the filesystem.
pub fn resolve_working_directory(raw: &str) -> Result<PathBuf> {
    let expanded = if raw == "~" || raw.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Dispatch("Cannot expand '~': home directory is unknown".to_string())
        })?;
        match raw.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home,
        }
    } else {
        PathBuf::from(raw)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    Ok(normalize(&absolute))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Remove staged scripts older than `max_age` from `dir`.
///
/// Returns how many files were removed.
pub fn sweep_stale_scripts(dir: &Path, prefix: &str, max_age: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || !name.ends_with(".sh") {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => debug!("Could not remove stale script {}: {}", name, e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale scripts from {}", removed, dir.display());
    }
    Ok(removed)
}
