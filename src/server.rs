//! MCP Server implementation
//!
//! Exposes the command router as MCP tools. Each call is validated into its
//! parameter struct and answered with a tool result; failures are reported
//! with the error flag set rather than as protocol errors.

use std::path::Path;
use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::registry::{ConnectOutcome, ConnectStep};
use crate::router::{
    command_line, run_download, run_exec, run_list_files, run_transfer, run_upload,
    CommandRouter, DirListing, RemoteAddress,
};
use crate::ssh::CommandOutput;
use crate::store::ServerDefinition;
use crate::tools::{
    input_schema, parse_params, ConnectParams, DownloadParams, ExecuteParams, ListFilesParams,
    ListSessionsParams, SessionParams, TransferParams, UploadParams,
};

/// SSH session manager MCP server
///
/// Tool calls share one router. It is locked for session bookkeeping only,
/// so calls on different sessions run concurrently.
#[derive(Clone)]
pub struct SshManagerServer {
    router: Arc<Mutex<CommandRouter>>,
}

impl SshManagerServer {
    pub fn new(router: CommandRouter) -> Self {
        Self {
            router: Arc::new(Mutex::new(router)),
        }
    }

    /// Close all sessions
    pub async fn shutdown(&self) {
        info!("Shutting down SSH manager MCP server...");
        self.router.lock().await.shutdown().await;
    }

    /// Run one tool call
    ///
    /// The router is locked only to look up sessions and record changes;
    /// remote I/O runs on cloned handles with the lock released.
    async fn dispatch(
        &self,
        tool_name: &str,
        args: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let router = self.router.as_ref();
        let outcome = match tool_name {
            "connect" => connect(router, args).await.map(Reply::text),
            "disconnect" => disconnect(router, args).await.map(Reply::text),
            "list_sessions" => list_sessions(router, args).await.map(Reply::text),
            "remove_server" => remove_server(router, args).await.map(Reply::text),
            "execute" => execute(router, args).await.map(|output| Reply {
                text: format_command_output(&output),
                is_error: !output.success(),
            }),
            "upload" => upload(router, args).await.map(Reply::text),
            "download" => download(router, args).await.map(Reply::text),
            "transfer" => transfer(router, args).await.map(Reply::text),
            "list_files" => list_files(router, args).await.map(Reply::text),
            _ => {
                return Err(McpError::invalid_params(
                    format!("Unknown tool: {}", tool_name),
                    None,
                ))
            }
        };

        Ok(match outcome {
            Ok(Reply {
                text,
                is_error: false,
            }) => CallToolResult::success(vec![Content::text(text)]),
            Ok(Reply {
                text,
                is_error: true,
            }) => CallToolResult::error(vec![Content::text(text)]),
            Err(e) => {
                error!("{} failed: {}", tool_name, e);
                CallToolResult::error(vec![Content::text(format!("Error: {}", e))])
            }
        })
    }

    fn tool(name: &'static str, description: &'static str, schema: Map<String, Value>) -> Tool {
        Tool::new(name, description, Arc::new(schema))
    }

    /// Tool definitions advertised by `list_tools`
    fn tools() -> Vec<Tool> {
        vec![
            Self::tool(
                "connect",
                "Connect a named SSH session. Give host, username and one credential to \
                 connect a new server (password and key paths are saved for reuse), or only \
                 sessionName to connect a saved server.",
                input_schema::<ConnectParams>(),
            ),
            Self::tool(
                "disconnect",
                "Close a named SSH session.",
                input_schema::<SessionParams>(),
            ),
            Self::tool(
                "list_sessions",
                "List connected sessions and saved servers with their endpoints.",
                input_schema::<ListSessionsParams>(),
            ),
            Self::tool(
                "remove_server",
                "Delete a saved server definition.",
                input_schema::<SessionParams>(),
            ),
            Self::tool(
                "execute",
                "Execute a shell command in a session and return stdout, stderr and exit code.",
                input_schema::<ExecuteParams>(),
            ),
            Self::tool(
                "upload",
                "Upload a local file to a path on the session's server.",
                input_schema::<UploadParams>(),
            ),
            Self::tool(
                "download",
                "Download a file from the session's server to a local path.",
                input_schema::<DownloadParams>(),
            ),
            Self::tool(
                "transfer",
                "Copy a file from one session's server to another's.",
                input_schema::<TransferParams>(),
            ),
            Self::tool(
                "list_files",
                "List a remote directory with entry type and size.",
                input_schema::<ListFilesParams>(),
            ),
        ]
    }
}

/// Text of a tool result and whether it carries the error flag
struct Reply {
    text: String,
    is_error: bool,
}

impl Reply {
    fn text(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }
}

async fn connect(router: &Mutex<CommandRouter>, args: Option<Map<String, Value>>) -> Result<String> {
    let params: ConnectParams = parse_params(args)?;
    let name = params.session_name.trim().to_string();
    let config = params.to_ssh_config()?;

    let step = router.lock().await.plan_connect(&name, config.as_ref())?;
    let outcome = match step {
        ConnectStep::Live(_) => ConnectOutcome::AlreadyConnected,
        ConnectStep::Pending(pending) => {
            let opened = pending.open().await?;
            router.lock().await.finish_connect(opened).await?
        }
    };

    let router = router.lock().await;
    let endpoint = router
        .registry()
        .get(&name)
        .map(|session| session.endpoint().to_string())
        .unwrap_or_default();

    let mut text = match outcome {
        ConnectOutcome::Connected => format!("Connected session '{}' to {}", name, endpoint),
        ConnectOutcome::AlreadyConnected => {
            format!("Session '{}' is already connected to {}", name, endpoint)
        }
    };

    // Only credentials that just authenticated are saved
    let definition = config
        .as_ref()
        .filter(|_| outcome == ConnectOutcome::Connected)
        .and_then(ServerDefinition::from_ssh_config);
    if let Some(definition) = definition {
        if let Err(e) = router.store().upsert(&name, definition) {
            warn!("Could not save server '{}': {}", name, e);
            text.push_str(&format!("\nWarning: server was not saved: {}", e));
        }
    }
    Ok(text)
}

async fn disconnect(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<String> {
    let params: SessionParams = parse_params(args)?;
    let name = router
        .lock()
        .await
        .disconnect(Some(&params.session_name))
        .await?;
    Ok(format!("Disconnected session '{}'", name))
}

async fn list_sessions(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<String> {
    let _: ListSessionsParams = parse_params(args)?;
    let rows = router.lock().await.sessions();
    if rows.is_empty() {
        return Ok("No sessions or saved servers".to_string());
    }

    Ok(rows
        .iter()
        .map(|row| format!("{}\t{}\t{}", row.name, row.endpoint, row.state.as_str()))
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn remove_server(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<String> {
    let params: SessionParams = parse_params(args)?;
    router.lock().await.remove_server(&params.session_name)?;
    Ok(format!("Removed saved server '{}'", params.session_name))
}

async fn execute(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<CommandOutput> {
    let params: ExecuteParams = parse_params(args)?;
    let command = command_line(&params.command)?;
    let handle = router
        .lock()
        .await
        .session_handle(Some(&params.session_name))?;

    debug!("execute on '{}': {}", params.session_name, command);
    run_exec(handle.as_ref(), command).await
}

async fn upload(router: &Mutex<CommandRouter>, args: Option<Map<String, Value>>) -> Result<String> {
    let params: UploadParams = parse_params(args)?;
    let handle = router
        .lock()
        .await
        .session_handle(Some(&params.session_name))?;

    let bytes = run_upload(
        handle.as_ref(),
        Path::new(&params.local_path),
        &params.remote_path,
    )
    .await?;
    Ok(format!(
        "Uploaded {} to {}:{} ({} bytes)",
        params.local_path, params.session_name, params.remote_path, bytes
    ))
}

async fn download(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<String> {
    let params: DownloadParams = parse_params(args)?;
    let handle = router
        .lock()
        .await
        .session_handle(Some(&params.session_name))?;

    let bytes = run_download(
        handle.as_ref(),
        &params.remote_path,
        Path::new(&params.local_path),
    )
    .await?;
    Ok(format!(
        "Downloaded {}:{} to {} ({} bytes)",
        params.session_name, params.remote_path, params.local_path, bytes
    ))
}

async fn transfer(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<String> {
    let params: TransferParams = parse_params(args)?;
    let source = RemoteAddress {
        session: params.source_session,
        path: params.source_remote_path,
    };
    let destination = RemoteAddress {
        session: params.destination_session,
        path: params.destination_remote_path,
    };

    let (src, dst) = router
        .lock()
        .await
        .transfer_handles(&source, &destination)?;
    let bytes = run_transfer(src.as_ref(), dst.as_ref(), &source, &destination).await?;
    Ok(format!(
        "Transferred {} bytes from {} to {}",
        bytes, source, destination
    ))
}

async fn list_files(
    router: &Mutex<CommandRouter>,
    args: Option<Map<String, Value>>,
) -> Result<String> {
    let params: ListFilesParams = parse_params(args)?;
    let handle = router
        .lock()
        .await
        .session_handle(Some(&params.session_name))?;

    let listing = run_list_files(handle.as_ref(), &params.remote_path).await?;
    Ok(format_listing(&params.remote_path, &listing))
}

/// stdout, then stderr under a marker, then the exit code
pub fn format_command_output(output: &CommandOutput) -> String {
    let mut text = output.stdout.clone();
    if !output.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("--- stderr ---\n");
        text.push_str(&output.stderr);
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("exit code: {}", output.exit_code()));
    text
}

/// One `type size name` line per entry
pub fn format_listing(path: &str, listing: &DirListing) -> String {
    match listing {
        DirListing::Empty => format!("{} is empty", path),
        DirListing::Entries(entries) => entries
            .iter()
            .map(|entry| format!("{:<7} {:>12}  {}", entry.kind.as_str(), entry.size, entry.name))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

impl ServerHandler for SshManagerServer {
    /// Return server information
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "SSH session manager v{} - connect named SSH sessions, run commands and move \
                 files between them",
                env!("CARGO_PKG_VERSION"),
            )),
        }
    }

    /// List available tools
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        debug!("list_tools called");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Call a tool
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let tool_name: &str = request.name.as_ref();
        debug!("call_tool called: {:?}", tool_name);

        self.dispatch(tool_name, request.arguments).await
    }
}
