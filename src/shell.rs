//! Interactive shell
//!
//! A line-oriented loop over the command router. Known keywords manage
//! sessions and files; any other line runs as a remote command on the active
//! session. Input, output and secret prompts are injected so the loop can be
//! driven from tests.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{debug, warn};

use crate::config::DEFAULT_SSH_PORT;
use crate::error::{Result, SshManagerError};
use crate::registry::ConnectOutcome;
use crate::router::{CommandRouter, RemoteAddress};
use crate::store::ServerDefinition;

const HELP: &str = "\
Commands:
  add                                  add a server step by step
  add <name> <host[:port]> <user> [password]
                                       save a password server (prompts when omitted)
  add <name> <host[:port]> <user> key <path>
                                       save a key server
  servers                              list sessions and saved servers
  connect <name>                       connect a saved server and make it active
  switch <name>                        make a connected session active
  disconnect [name]                    close a session (default: active)
  remove <name>                        delete a saved server
  upload <local> <remote>              copy a local file to the active session
  download <remote> <local>            copy a file from the active session
  transfer <name:path> <name:path>     copy a file between sessions
  help                                 show this help
  exit | quit                          close all sessions and leave
Anything else runs as a command on the active session.";

/// Source of secrets typed without echo
#[async_trait]
pub trait SecretPrompt: Send {
    async fn secret(&mut self, prompt: &str) -> Result<String>;
}

/// Reads secrets from the controlling terminal
pub struct TerminalPrompt;

#[async_trait]
impl SecretPrompt for TerminalPrompt {
    async fn secret(&mut self, prompt: &str) -> Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
            .await
            .map_err(|e| SshManagerError::Io(std::io::Error::other(e)))?
            .map_err(SshManagerError::from)
    }
}

/// Arguments of `add`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddForm {
    /// Ask for every field
    Guided,
    /// Password server; the password is prompted when not given
    Password {
        name: String,
        host: String,
        port: u16,
        username: String,
        password: Option<String>,
    },
    /// Key server referencing a key file
    Key {
        name: String,
        host: String,
        port: u16,
        username: String,
        key_path: PathBuf,
    },
}

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Add(AddForm),
    Servers,
    Connect(String),
    Switch(String),
    Disconnect(Option<String>),
    Remove(String),
    Upload { local: PathBuf, remote: String },
    Download { remote: String, local: PathBuf },
    Transfer {
        source: RemoteAddress,
        destination: RemoteAddress,
    },
    Help,
    Exit,
    /// Remote command for the active session
    Exec(String),
    Empty,
}

impl ShellCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&keyword, args)) = words.split_first() else {
            return Ok(ShellCommand::Empty);
        };

        let command = match keyword {
            "add" => ShellCommand::Add(parse_add(args)?),
            "servers" => {
                expect_args(keyword, args, 0, "servers")?;
                ShellCommand::Servers
            }
            "connect" => {
                expect_args(keyword, args, 1, "connect <name>")?;
                ShellCommand::Connect(args[0].to_string())
            }
            "switch" => {
                expect_args(keyword, args, 1, "switch <name>")?;
                ShellCommand::Switch(args[0].to_string())
            }
            "disconnect" => match args {
                [] => ShellCommand::Disconnect(None),
                [name] => ShellCommand::Disconnect(Some(name.to_string())),
                _ => return Err(usage("disconnect [name]")),
            },
            "remove" => {
                expect_args(keyword, args, 1, "remove <name>")?;
                ShellCommand::Remove(args[0].to_string())
            }
            "upload" => {
                expect_args(keyword, args, 2, "upload <local> <remote>")?;
                ShellCommand::Upload {
                    local: PathBuf::from(args[0]),
                    remote: args[1].to_string(),
                }
            }
            "download" => {
                expect_args(keyword, args, 2, "download <remote> <local>")?;
                ShellCommand::Download {
                    remote: args[0].to_string(),
                    local: PathBuf::from(args[1]),
                }
            }
            "transfer" => {
                expect_args(keyword, args, 2, "transfer <name:path> <name:path>")?;
                ShellCommand::Transfer {
                    source: RemoteAddress::parse(args[0])?,
                    destination: RemoteAddress::parse(args[1])?,
                }
            }
            "help" => ShellCommand::Help,
            "exit" | "quit" => ShellCommand::Exit,
            _ => ShellCommand::Exec(line.to_string()),
        };
        Ok(command)
    }
}

fn usage(synopsis: &str) -> SshManagerError {
    SshManagerError::usage(format!("usage: {}", synopsis))
}

fn expect_args(keyword: &str, args: &[&str], count: usize, synopsis: &str) -> Result<()> {
    if args.len() != count {
        debug!("{} expects {} argument(s), got {}", keyword, count, args.len());
        return Err(usage(synopsis));
    }
    Ok(())
}

fn parse_add(args: &[&str]) -> Result<AddForm> {
    let form = match args {
        [] => AddForm::Guided,
        [_, _, _, "key"] => return Err(usage("add <name> <host[:port]> <user> key <path>")),
        [name, host, user] | [name, host, user, _] => {
            let (host, port) = parse_host_port(host)?;
            AddForm::Password {
                name: name.to_string(),
                host,
                port,
                username: user.to_string(),
                password: args.get(3).map(|p| p.to_string()),
            }
        }
        [name, host, user, "key", path] => {
            let (host, port) = parse_host_port(host)?;
            AddForm::Key {
                name: name.to_string(),
                host,
                port,
                username: user.to_string(),
                key_path: PathBuf::from(path),
            }
        }
        _ => {
            return Err(usage(
                "add [<name> <host[:port]> <user> [password] | <name> <host[:port]> <user> key <path>]",
            ))
        }
    };
    Ok(form)
}

/// `host` or `host:port`; a host with several colons is taken as-is
pub fn parse_host_port(input: &str) -> Result<(String, u16)> {
    if input.matches(':').count() != 1 {
        return Ok((input.to_string(), DEFAULT_SSH_PORT));
    }

    let (host, port) = input
        .split_once(':')
        .ok_or_else(|| SshManagerError::usage(format!("invalid host '{}'", input)))?;
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| {
            SshManagerError::usage(format!("port must be between 1 and 65535, got '{}'", port))
        })?;
    if host.is_empty() {
        return Err(SshManagerError::usage(format!("missing host in '{}'", input)));
    }
    Ok((host.to_string(), port))
}

/// Whether the loop keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Shell<R, W, P> {
    router: CommandRouter,
    input: Lines<R>,
    output: W,
    secrets: P,
}

impl<R, W, P> Shell<R, W, P>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: SecretPrompt,
{
    pub fn new(router: CommandRouter, input: R, output: W, secrets: P) -> Self {
        Self {
            router,
            input: input.lines(),
            output,
            secrets,
        }
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Connect or set up a first server, then read commands until exit or end of input
    ///
    /// All sessions are closed on the way out.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_loop().await;
        self.router.shutdown().await;
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        if let Err(e) = self.startup().await {
            self.say(&format!("Error: {}", e)).await?;
        }

        loop {
            self.report_evictions().await?;

            let prompt = match self.router.active() {
                Some(name) => format!("ssh-manager [{}]> ", name),
                None => "ssh-manager> ".to_string(),
            };
            let Some(line) = self.ask(&prompt).await? else {
                self.say("").await?;
                break;
            };

            let outcome = match ShellCommand::parse(&line) {
                Ok(command) => self.execute(command).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => self.say(&format!("Error: {}", e)).await?,
            }
        }
        Ok(())
    }

    /// First saved server gets connected; with none saved the guided flow runs
    async fn startup(&mut self) -> Result<()> {
        let first = self.router.store().load().into_keys().next();
        match first {
            Some(name) => self.connect(&name).await,
            None => {
                self.say("No saved servers yet. Add one (empty name skips).")
                    .await?;
                if let Some(name) = self.guided_add().await? {
                    self.connect(&name).await?;
                }
                Ok(())
            }
        }
    }

    async fn report_evictions(&mut self) -> Result<()> {
        for name in self.router.reap_closed() {
            warn!("Session '{}' was closed by the remote side", name);
            self.say(&format!("Warning: connection to '{}' was lost", name))
                .await?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: ShellCommand) -> Result<Flow> {
        match command {
            ShellCommand::Empty => {}
            ShellCommand::Help => self.say(HELP).await?,
            ShellCommand::Exit => return Ok(Flow::Exit),
            ShellCommand::Add(form) => self.add(form).await?,
            ShellCommand::Servers => self.servers().await?,
            ShellCommand::Connect(name) => self.connect(&name).await?,
            ShellCommand::Switch(name) => {
                self.router.switch(&name)?;
                self.say(&format!("Active session: {}", name)).await?;
            }
            ShellCommand::Disconnect(target) => {
                let name = self.router.disconnect(target.as_deref()).await?;
                self.say(&format!("Disconnected '{}'", name)).await?;
            }
            ShellCommand::Remove(name) => {
                self.router.remove_server(&name)?;
                self.say(&format!("Removed saved server '{}'", name))
                    .await?;
            }
            ShellCommand::Upload { local, remote } => {
                let bytes = self.router.upload(None, &local, &remote).await?;
                self.say(&format!("Uploaded {} bytes to {}", bytes, remote))
                    .await?;
            }
            ShellCommand::Download { remote, local } => {
                let bytes = self.router.download(None, &remote, &local).await?;
                self.say(&format!(
                    "Downloaded {} bytes to {}",
                    bytes,
                    local.display()
                ))
                .await?;
            }
            ShellCommand::Transfer {
                source,
                destination,
            } => {
                let bytes = self.router.transfer(&source, &destination).await?;
                self.say(&format!(
                    "Transferred {} bytes from {} to {}",
                    bytes, source, destination
                ))
                .await?;
            }
            ShellCommand::Exec(command) => self.exec(&command).await?,
        }
        Ok(Flow::Continue)
    }

    async fn exec(&mut self, command: &str) -> Result<()> {
        let output = self.router.exec(None, command).await?;
        self.output.write_all(output.stdout.as_bytes()).await?;
        self.output.write_all(output.stderr.as_bytes()).await?;
        if output.exit_code() != 0 {
            self.say(&format!("[exit code {}]", output.exit_code()))
                .await?;
        }
        self.output.flush().await?;
        Ok(())
    }

    async fn connect(&mut self, name: &str) -> Result<()> {
        self.say(&format!("Connecting to '{}'...", name)).await?;
        let outcome = self.router.connect_saved(name).await?;
        self.router.switch(name)?;

        let endpoint = self
            .router
            .registry()
            .get(name)
            .map(|session| session.endpoint().to_string())
            .unwrap_or_default();
        let message = match outcome {
            ConnectOutcome::Connected => format!("Connected to {} as '{}'", endpoint, name),
            ConnectOutcome::AlreadyConnected => {
                format!("Already connected to {}; '{}' is now active", endpoint, name)
            }
        };
        self.say(&message).await
    }

    async fn servers(&mut self) -> Result<()> {
        let rows = self.router.sessions();
        if rows.is_empty() {
            return self.say("No sessions or saved servers").await;
        }

        let width = rows.iter().map(|row| row.name.len()).max().unwrap_or(0);
        let mut text = String::new();
        for row in rows {
            let marker = if row.active { '*' } else { ' ' };
            text.push_str(&format!(
                "{} {:<width$}  {:<9}  {}\n",
                marker,
                row.name,
                row.state.as_str(),
                row.endpoint,
                width = width
            ));
        }
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn add(&mut self, form: AddForm) -> Result<()> {
        let (name, definition) = match form {
            AddForm::Guided => {
                if let Some(name) = self.guided_add().await? {
                    self.say(&format!("Connect with: connect {}", name)).await?;
                }
                return Ok(());
            }
            AddForm::Password {
                name,
                host,
                port,
                username,
                password,
            } => {
                let password = match password {
                    Some(password) => password,
                    None => self.secrets.secret("Password: ").await?,
                };
                let definition = ServerDefinition::with_password(host, port, username, password);
                (name, definition)
            }
            AddForm::Key {
                name,
                host,
                port,
                username,
                key_path,
            } => (
                name,
                ServerDefinition::with_key(host, port, username, key_path, None),
            ),
        };

        self.router.add_server(&name, definition)?;
        self.say(&format!("Saved server '{}'", name)).await
    }

    /// Ask for each field of a new server and save it
    ///
    /// Returns the saved name, or None when the user gave an empty name or
    /// input ended.
    async fn guided_add(&mut self) -> Result<Option<String>> {
        let name = match self.ask("Server name: ").await? {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                self.say("Skipped").await?;
                return Ok(None);
            }
        };
        if self.router.store().contains(&name) {
            return Err(SshManagerError::already_exists(format!(
                "a server named '{}' is already saved",
                name
            )));
        }

        let (host, port) = parse_host_port(&self.require("Host[:port]: ").await?)?;
        let username = self.require("Username: ").await?;
        let kind = self
            .ask("Auth (password/key) [password]: ")
            .await?
            .map(|kind| kind.trim().to_lowercase())
            .unwrap_or_default();

        let definition = match kind.as_str() {
            "" | "password" => {
                let password = self.secrets.secret("Password: ").await?;
                ServerDefinition::with_password(host, port, username, password)
            }
            "key" => {
                let key_path = self.require("Private key path: ").await?;
                let passphrase = self
                    .secrets
                    .secret("Passphrase (empty for none): ")
                    .await?;
                let passphrase = Some(passphrase).filter(|p| !p.is_empty());
                ServerDefinition::with_key(host, port, username, key_path, passphrase)
            }
            other => {
                return Err(SshManagerError::usage(format!(
                    "unknown auth kind '{}'; use password or key",
                    other
                )))
            }
        };

        self.router.add_server(&name, definition)?;
        self.say(&format!("Saved server '{}'", name)).await?;
        Ok(Some(name))
    }

    /// Like `ask`, but an empty answer or end of input is a usage error
    async fn require(&mut self, question: &str) -> Result<String> {
        match self.ask(question).await? {
            Some(answer) if !answer.trim().is_empty() => Ok(answer.trim().to_string()),
            _ => Err(SshManagerError::usage(format!(
                "{} is required",
                question.trim_end_matches([':', ' '])
            ))),
        }
    }

    /// Print a prompt and read one line; None at end of input
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;
        Ok(self.input.next_line().await?)
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }
}
