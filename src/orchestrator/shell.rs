//! Shell selection and argument quoting.
//!
//! The agent binary runs inside a full shell so the user's PATH and profile
//! apply. The command line is therefore a single string, and every
//! argument must be quoted for the target shell.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Operating system family the agent runs on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Windows (`cmd.exe`).
    #[serde(alias = "win32")]
    Windows,
    /// macOS.
    #[serde(alias = "darwin")]
    Macos,
    /// Linux and other POSIX systems.
    Linux,
}

impl Platform {
    /// Platform this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Macos
        } else {
            Self::Linux
        }
    }

    /// Whether the platform uses `cmd.exe` quoting.
    #[must_use]
    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }
}

/// Characters that force quoting on POSIX shells.
const POSIX_SPECIAL: &[char] = &[
    '\'', '"', '\\', '$', '`', ';', '&', '|', '<', '>', '(', ')', '*', '?', '[', ']', '#', '~',
    '!', '{', '}',
];

/// Characters that force quoting for `cmd.exe`.
const WINDOWS_SPECIAL: &[char] = &['"', '&', '|', '<', '>', '^'];

/// Quote `arg` for the platform's shell, leaving plain words untouched.
///
/// Windows wraps in double quotes and doubles embedded ones. POSIX wraps in
/// single quotes and writes embedded single quotes as `'\''`.
#[must_use]
pub fn escape_arg(platform: Platform, arg: &str) -> String {
    if platform.is_windows() {
        if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || WINDOWS_SPECIAL.contains(&c))
        {
            format!("\"{}\"", arg.replace('"', "\"\""))
        } else {
            arg.to_owned()
        }
    } else if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || POSIX_SPECIAL.contains(&c))
    {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_owned()
    }
}

/// Join a program and its arguments into one quoted command string.
#[must_use]
pub fn build_shell_command(platform: Platform, program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|part| escape_arg(platform, part))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick the shell for `platform`.
///
/// `user_shell` is the value of `$SHELL`; `exists` reports whether a path
/// is an executable file.
#[must_use]
pub fn select_shell(
    platform: Platform,
    packaged: bool,
    user_shell: Option<&str>,
    exists: impl Fn(&Path) -> bool,
) -> String {
    match platform {
        Platform::Windows => "cmd.exe".into(),
        Platform::Macos if packaged => "/bin/sh".into(),
        _ => {
            if let Some(shell) = user_shell.filter(|s| !s.is_empty()) {
                if exists(Path::new(shell)) {
                    return shell.to_owned();
                }
            }
            ["/bin/bash", "/bin/zsh", "/bin/sh"]
                .into_iter()
                .find(|candidate| exists(Path::new(candidate)))
                .unwrap_or("/bin/sh")
                .to_owned()
        }
    }
}

/// Shell for `platform` on this host, consulting `$SHELL` and the filesystem.
#[must_use]
pub fn platform_shell(platform: Platform, packaged: bool) -> String {
    let user_shell = env::var("SHELL").ok();
    select_shell(platform, packaged, user_shell.as_deref(), Path::is_file)
}

/// Arguments that make the shell run `command` and exit.
#[must_use]
pub fn shell_args(platform: Platform, command: String) -> Vec<String> {
    if platform.is_windows() {
        vec!["/s".into(), "/c".into(), command]
    } else {
        vec!["-c".into(), command]
    }
}
