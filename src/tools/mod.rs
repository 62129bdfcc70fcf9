//! MCP tool parameters
//!
//! One struct per tool. Field docs become the JSON schema descriptions
//! advertised in `list_tools`; arguments are validated by deserializing into
//! these structs plus the explicit checks below.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DEFAULT_SSH_PORT;
use crate::error::{Result, SshManagerError};
use crate::ssh::{Credential, Endpoint, SshConfig};

/// Parameters for the connect tool
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectParams {
    /// Name of the session; also the saved server name
    pub session_name: String,

    /// Remote host. Omit to connect a saved server by name
    pub host: Option<String>,

    /// SSH port (default 22)
    #[schemars(range(min = 1, max = 65535))]
    pub port: Option<u32>,

    /// Remote username (required with host)
    pub username: Option<String>,

    /// Password for password authentication (saved for reuse)
    pub password: Option<String>,

    /// Path of a private key file on this machine (path is saved for reuse)
    pub private_key_path: Option<String>,

    /// Private key content; used for this connection only and never saved
    pub private_key: Option<String>,

    /// Passphrase of the private key
    pub passphrase: Option<String>,
}

impl ConnectParams {
    /// Explicit connection parameters, or None to use a saved server
    pub fn to_ssh_config(&self) -> Result<Option<SshConfig>> {
        validate_name(&self.session_name, "sessionName")?;

        let port = match self.port {
            None => DEFAULT_SSH_PORT,
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| {
                    SshManagerError::usage(format!(
                        "port must be between 1 and 65535, got {}",
                        port
                    ))
                })?,
        };

        let host = match self.host.as_deref().map(str::trim) {
            None | Some("") => {
                self.check_saved_server_form()?;
                return Ok(None);
            }
            Some(host) => host,
        };

        let username = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SshManagerError::usage("username is required when host is given"))?;

        let credential = match (&self.password, &self.private_key_path, &self.private_key) {
            (Some(password), None, None) => Credential::Password(password.clone()),
            (None, Some(path), None) => Credential::KeyFile {
                path: PathBuf::from(path),
                passphrase: self.passphrase.clone(),
            },
            (None, None, Some(data)) => Credential::KeyData {
                data: data.clone(),
                passphrase: self.passphrase.clone(),
            },
            (None, None, None) => {
                return Err(SshManagerError::usage(
                    "one of password, privateKeyPath or privateKey is required",
                ))
            }
            _ => {
                return Err(SshManagerError::usage(
                    "give only one of password, privateKeyPath or privateKey",
                ))
            }
        };

        Ok(Some(SshConfig::new(
            Endpoint::new(host, port, username),
            credential,
        )))
    }
}

impl ConnectParams {
    /// Connecting a saved server takes nothing but its name
    fn check_saved_server_form(&self) -> Result<()> {
        let given: Vec<&str> = [
            ("port", self.port.is_some()),
            ("username", self.username.is_some()),
            ("password", self.password.is_some()),
            ("privateKeyPath", self.private_key_path.is_some()),
            ("privateKey", self.private_key.is_some()),
            ("passphrase", self.passphrase.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect();

        if !given.is_empty() {
            return Err(SshManagerError::usage(format!(
                "{} require host; give only sessionName to connect a saved server",
                given.join(", ")
            )));
        }
        Ok(())
    }
}

/// Parameters for tools addressing one session by name
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionParams {
    /// Name of the session
    pub session_name: String,
}

/// Parameters for the list_sessions tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListSessionsParams {}

/// Parameters for the execute tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecuteParams {
    /// Name of the session
    pub session_name: String,

    /// Shell command to execute on the remote server
    pub command: String,
}

/// Parameters for the upload tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadParams {
    /// Name of the session
    pub session_name: String,

    /// File on this machine to upload
    pub local_path: String,

    /// Destination path on the remote server (parent must exist)
    pub remote_path: String,
}

/// Parameters for the download tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DownloadParams {
    /// Name of the session
    pub session_name: String,

    /// File on the remote server
    pub remote_path: String,

    /// Destination on this machine; missing directories are created
    pub local_path: String,
}

/// Parameters for the transfer tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferParams {
    /// Session to read from
    pub source_session: String,

    /// File to read on the source server
    pub source_remote_path: String,

    /// Session to write to
    pub destination_session: String,

    /// File to write on the destination server
    pub destination_remote_path: String,
}

/// Parameters for the list_files tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListFilesParams {
    /// Name of the session
    pub session_name: String,

    /// Remote directory to list
    pub remote_path: String,
}

/// Input schema of a parameter struct as a JSON object
pub fn input_schema<T: JsonSchema>() -> Map<String, Value> {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default()
}

/// Deserialize tool arguments, reporting problems as usage errors
pub fn parse_params<T: DeserializeOwned>(arguments: Option<Map<String, Value>>) -> Result<T> {
    let value = Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value)
        .map_err(|e| SshManagerError::usage(format!("Invalid arguments: {}", e)))
}

fn validate_name(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SshManagerError::usage(format!("{} cannot be empty", field)));
    }
    Ok(())
}
