//! Externally visible actions and the ports that perform them.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::util::browser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundKind {
    /// Someone else's PR is waiting on the user.
    Honk,
    /// The user's own PR is blocked.
    Rocket,
}

impl SoundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundKind::Honk => "honk",
            SoundKind::Rocket => "rocket",
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Notify { title: String, body: String },
    PlaySound(SoundKind),
    /// Subject to the browser limiter at execution time.
    OpenUrl(String),
}

/// Fire-and-forget side effects. Implementations must not block on the
/// outcome of the action they start.
pub trait EffectPort: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<()>;
    fn play_sound(&self, kind: SoundKind) -> Result<()>;
    fn open_url(&self, url: &str) -> Result<()>;
}

/// Starts OS processes.
pub trait CommandPort: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommands;

impl CommandPort for ProcessCommands {
    fn spawn(&self, program: &str, args: &[String]) -> Result<()> {
        // tokio reaps the child once it exits
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {program}"))?;
        debug!(program = program, "Spawned process");
        Ok(())
    }
}

/// Desktop notifications, sounds and browser tabs for the local user.
pub struct DesktopEffects {
    commands: Arc<dyn CommandPort>,
    sound_command: Option<String>,
}

impl DesktopEffects {
    pub fn new(commands: Arc<dyn CommandPort>, sound_command: Option<String>) -> Self {
        Self {
            commands,
            sound_command,
        }
    }
}

fn applescript_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl EffectPort for DesktopEffects {
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification {} with title {}",
                applescript_string(body),
                applescript_string(title)
            );
            self.commands
                .spawn("osascript", &["-e".to_string(), script])
        } else if cfg!(unix) {
            self.commands.spawn(
                "notify-send",
                &[
                    "--app-name=ghblock".to_string(),
                    title.to_string(),
                    body.to_string(),
                ],
            )
        } else {
            debug!(title = title, "Desktop notifications unsupported on this platform");
            Ok(())
        }
    }

    fn play_sound(&self, kind: SoundKind) -> Result<()> {
        if let Some(cmd) = &self.sound_command {
            return self.commands.spawn(cmd, &[kind.as_str().to_string()]);
        }
        if cfg!(target_os = "macos") {
            let file = match kind {
                SoundKind::Honk => "/System/Library/Sounds/Glass.aiff",
                SoundKind::Rocket => "/System/Library/Sounds/Hero.aiff",
            };
            return self.commands.spawn("afplay", &[file.to_string()]);
        }
        debug!(sound = %kind, "No sound command configured");
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        browser::open_url(url)
    }
}
