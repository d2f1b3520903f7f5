//! The closed command enumeration and per-command argument allow-lists.

use crate::error::ExecutorError;

/// MCP CLI commands the portal is permitted to invoke. Anything outside this
/// enumeration is rejected before a subprocess is ever spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalCommand {
    ServerEnable,
    ServerDisable,
    ServerRestart,
    CatalogSync,
    StatusProbe,
    ConfigApply,
}

impl PortalCommand {
    pub fn parse(raw: &str) -> Result<Self, ExecutorError> {
        match raw {
            "server-enable" => Ok(Self::ServerEnable),
            "server-disable" => Ok(Self::ServerDisable),
            "server-restart" => Ok(Self::ServerRestart),
            "catalog-sync" => Ok(Self::CatalogSync),
            "status-probe" => Ok(Self::StatusProbe),
            "config-apply" => Ok(Self::ConfigApply),
            other => Err(ExecutorError::InvalidCommand(other.to_string())),
        }
    }

    pub fn as_cli_subcommand(self) -> &'static str {
        match self {
            Self::ServerEnable => "server-enable",
            Self::ServerDisable => "server-disable",
            Self::ServerRestart => "server-restart",
            Self::CatalogSync => "catalog-sync",
            Self::StatusProbe => "status-probe",
            Self::ConfigApply => "config-apply",
        }
    }

    /// Maximum number of positional arguments this command accepts, beyond
    /// the subcommand name itself.
    fn max_args(self) -> usize {
        match self {
            Self::ServerEnable | Self::ServerDisable | Self::ServerRestart | Self::StatusProbe => 1,
            Self::CatalogSync => 0,
            Self::ConfigApply => 2,
        }
    }
}

/// Validates one argument against the shared safety rules: no shell
/// metacharacters, no path-traversal sequences, no leading `/` where not
/// expected, no NUL bytes.
fn validate_argument(arg: &str) -> Result<(), ExecutorError> {
    if arg.is_empty() {
        return Err(ExecutorError::UnsafeArgument("empty argument".into()));
    }
    if arg.contains('\0') {
        return Err(ExecutorError::UnsafeArgument("NUL byte in argument".into()));
    }
    const SHELL_METACHARACTERS: &[char] = &[
        ';', '|', '&', '$', '`', '>', '<', '(', ')', '{', '}', '\n', '\r', '*', '?', '~', '!', '#',
    ];
    if arg.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(ExecutorError::UnsafeArgument(format!(
            "shell metacharacter in argument: {arg:?}"
        )));
    }
    if arg.contains("..") {
        return Err(ExecutorError::UnsafeArgument(format!(
            "path-traversal sequence in argument: {arg:?}"
        )));
    }
    if arg.starts_with('/') || arg.starts_with('\\') {
        return Err(ExecutorError::UnsafeArgument(format!(
            "absolute path not permitted in argument: {arg:?}"
        )));
    }
    // Server names / identifiers: conservative allow-list.
    if !arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '='))
    {
        return Err(ExecutorError::UnsafeArgument(format!(
            "argument contains disallowed characters: {arg:?}"
        )));
    }
    Ok(())
}

/// Validates the full argument list against the command's allow-list.
pub fn validate_args(command: PortalCommand, args: &[String]) -> Result<(), ExecutorError> {
    if args.len() > command.max_args() {
        return Err(ExecutorError::UnsafeArgument(format!(
            "{command:?} accepts at most {} argument(s), got {}",
            command.max_args(),
            args.len()
        )));
    }
    for arg in args {
        validate_argument(arg)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(PortalCommand::parse("server-enable").unwrap(), PortalCommand::ServerEnable);
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(PortalCommand::parse("rm-rf").is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let err = validate_args(PortalCommand::ServerEnable, &["alpha; rm -rf /".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_path_traversal() {
        let err = validate_args(PortalCommand::ServerEnable, &["../../etc/passwd".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_nul_byte() {
        let err = validate_args(PortalCommand::ServerEnable, &["alpha\0".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    fn accepts_plain_server_name() {
        assert!(validate_args(PortalCommand::ServerEnable, &["alpha-1".to_string()]).is_ok());
    }

    #[test]
    fn rejects_too_many_args() {
        let args = vec!["a".to_string(), "b".to_string()];
        assert!(validate_args(PortalCommand::ServerEnable, &args).is_err());
    }
}
