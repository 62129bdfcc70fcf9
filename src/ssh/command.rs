//! Command execution over SSH
//!
//! Provides the `CommandOutput` struct and exec-channel output collection.

use russh::ChannelMsg;
use tracing::debug;

use super::connection::RusshConnection;
use crate::error::{Result, SshManagerError};

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit status as reported by the server, if it sent one
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Exit code, 0 when the server reported none
    pub fn exit_code(&self) -> u32 {
        self.exit_status.unwrap_or(0)
    }

    /// Check if the command succeeded
    pub fn success(&self) -> bool {
        self.exit_code() == 0
    }
}

/// Raw channel output, decoded once the channel closes
///
/// Packets may split a multi-byte character, so bytes are kept until the end.
#[derive(Debug, Default)]
pub(crate) struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl OutputCollector {
    pub(crate) fn data(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    pub(crate) fn extended_data(&mut self, ext: u32, data: &[u8]) {
        // ext == 1 is SSH_EXTENDED_DATA_STDERR
        if ext == 1 {
            self.stderr.extend_from_slice(data);
        } else {
            self.stdout.extend_from_slice(data);
        }
    }

    pub(crate) fn exit_status(&mut self, exit_status: u32) {
        self.exit_status = Some(exit_status);
    }

    pub(crate) fn finish(self) -> CommandOutput {
        CommandOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_status: self.exit_status,
        }
    }
}

impl RusshConnection {
    /// Execute command via a new exec channel
    pub(crate) async fn exec_via_channel(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| SshManagerError::remote(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshManagerError::remote(format!("Failed to exec command: {}", e)))?;

        let mut collector = OutputCollector::default();

        // exit-status may arrive after EOF, so only a close ends collection
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => collector.data(&data),
                ChannelMsg::ExtendedData { data, ext } => collector.extended_data(ext, &data),
                ChannelMsg::ExitStatus { exit_status } => collector.exit_status(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let output = collector.finish();
        debug!(
            "Command completed: exit_status={:?}, stdout_len={}, stderr_len={}",
            output.exit_status,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let output = CommandOutput {
            stdout: "hello".to_string(),
            stderr: String::new(),
            exit_status: Some(0),
        };
        assert!(output.success());
    }

    #[test]
    fn test_command_output_failure() {
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "error".to_string(),
            exit_status: Some(2),
        };
        assert!(!output.success());
        assert_eq!(output.exit_code(), 2);
    }

    #[test]
    fn test_missing_exit_status_reads_as_zero() {
        let output = CommandOutput {
            stdout: "hello".to_string(),
            stderr: String::new(),
            exit_status: None,
        };
        assert_eq!(output.exit_code(), 0);
        assert!(output.success());
    }

    #[test]
    fn test_character_split_across_packets() {
        let bytes = "héllo wörld".as_bytes();
        let mut collector = OutputCollector::default();
        collector.data(&bytes[..2]);
        collector.data(&bytes[2..9]);
        collector.data(&bytes[9..]);
        collector.extended_data(1, &[0xC3]);
        collector.extended_data(1, &[0xA9]);
        collector.exit_status(3);

        let output = collector.finish();
        assert_eq!(output.stdout, "héllo wörld");
        assert_eq!(output.stderr, "é");
        assert_eq!(output.exit_status, Some(3));
    }

    #[test]
    fn test_other_extended_data_goes_to_stdout() {
        let mut collector = OutputCollector::default();
        collector.extended_data(2, b"x");
        assert_eq!(collector.finish().stdout, "x");
    }
}
