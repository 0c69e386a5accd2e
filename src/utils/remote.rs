// mysql-helper/src/utils/remote.rs
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{AppError, Result};
use crate::profiles::resolver::{AuthMethod, RemoteParams};

/// A program and its arguments to run on a remote host. Quoting happens once,
/// in [`RemoteCommand::command_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        RemoteCommand { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The shell-quoted line sent over the SSH channel.
    pub fn command_line(&self) -> Result<String> {
        shlex::try_join(std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)))
            .map_err(|e| AppError::invalid(format!("Remote command cannot be quoted: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Authenticated command execution on SSH hosts.
pub trait RemoteExecutor: Send + Sync {
    /// Authentication methods offered by the server for `username`. `agent` is
    /// listed whenever `publickey` is.
    fn accepted_methods(&self, host: &str, port: u16, username: &str) -> Result<Vec<String>>;

    /// Authenticates and checks that `binary` can be found on the remote `PATH`.
    fn test(&self, params: &RemoteParams, binary: &str) -> Result<()>;

    fn exec(&self, params: &RemoteParams, command: &RemoteCommand) -> Result<RemoteOutput>;
}

/// Runs `command` on a remote that has passed a connectivity test, failing on a
/// non-zero exit status.
pub fn exec_checked(
    executor: &dyn RemoteExecutor,
    params: &RemoteParams,
    command: &RemoteCommand,
) -> Result<RemoteOutput> {
    if !params.working {
        return Err(AppError::invalid(format!(
            "Remote {} has not been tested successfully; run `mysql-helper configure` to test it first",
            params.name
        )));
    }

    let output = executor.exec(params, command)?;
    if !output.success() {
        return Err(AppError::external(
            format!("Remote command `{}` exited with status {}", command.program, output.status),
            output.stderr.trim(),
        ));
    }
    Ok(output)
}

/// [`RemoteExecutor`] over libssh2. One session per call.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(timeout: Duration) -> Self {
        SshExecutor { timeout }
    }

    fn connect(&self, host: &str, port: u16) -> Result<Session> {
        let address = format!("{}:{}", host, port);
        let socket = (host, port)
            .to_socket_addrs()
            .map_err(|e| AppError::external(format!("Failed to resolve {}", address), e))?
            .next()
            .ok_or_else(|| AppError::external(format!("Failed to resolve {}", address), "no addresses"))?;

        let tcp = TcpStream::connect_timeout(&socket, self.timeout)
            .map_err(|e| AppError::external(format!("Failed to connect to SSH server {}", address), e))?;
        tcp.set_read_timeout(Some(self.timeout))
            .and_then(|_| tcp.set_write_timeout(Some(self.timeout)))
            .map_err(|e| AppError::external(format!("Failed to configure socket for {}", address), e))?;

        let mut session =
            Session::new().map_err(|e| AppError::external("Failed to create SSH session", e))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| AppError::external(format!("SSH handshake with {} failed", address), e))?;
        Ok(session)
    }

    fn open(&self, params: &RemoteParams) -> Result<Session> {
        info!(remote = %params.name, address = %params.address(), method = params.auth.tag(), "Opening SSH session");
        let session = self.connect(&params.host, params.port)?;
        authenticate(&session, &params.username, &params.auth)?;
        // Reads may legitimately take longer than the connect timeout once the
        // remote starts a backup.
        session.set_timeout(0);
        Ok(session)
    }
}

fn authenticate(session: &Session, username: &str, auth: &AuthMethod) -> Result<()> {
    let failed = |e: ssh2::Error| AppError::external(format!("SSH authentication ({}) failed", auth.tag()), e);

    match auth {
        AuthMethod::None => {
            // Asking for the method list attempts "none" authentication.
            let _ = session.auth_methods(username);
        }
        AuthMethod::Agent => session.userauth_agent(username).map_err(failed)?,
        AuthMethod::Password { password } => session.userauth_password(username, password).map_err(failed)?,
        AuthMethod::PublicKey { public_key, private_key, passphrase } => {
            if !private_key.is_file() {
                return Err(AppError::external(
                    "SSH authentication (publickey) failed",
                    format!("private key {} not found", private_key.display()),
                ));
            }
            let public_key = public_key.is_file().then_some(public_key.as_path());
            session
                .userauth_pubkey_file(username, public_key, private_key, passphrase.as_deref())
                .map_err(failed)?;
        }
    }

    if !session.authenticated() {
        return Err(AppError::external(
            format!("SSH authentication ({}) failed", auth.tag()),
            "server did not accept the credentials",
        ));
    }
    debug!(method = auth.tag(), "SSH authentication successful");
    Ok(())
}

fn parse_methods(advertised: &str) -> Vec<String> {
    let mut methods: Vec<String> = advertised
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if methods.iter().any(|m| m == "publickey") && !methods.iter().any(|m| m == "agent") {
        methods.push("agent".to_string());
    }
    methods
}

impl RemoteExecutor for SshExecutor {
    fn accepted_methods(&self, host: &str, port: u16, username: &str) -> Result<Vec<String>> {
        let session = self.connect(host, port)?;
        match session.auth_methods(username) {
            Ok(advertised) => Ok(parse_methods(advertised)),
            Err(_) if session.authenticated() => Ok(vec!["none".to_string()]),
            Err(e) => Err(AppError::external(format!("Failed to query methods from {}:{}", host, port), e)),
        }
    }

    fn test(&self, params: &RemoteParams, binary: &str) -> Result<()> {
        let check = RemoteCommand::new("command").args(["-v", binary]);
        let output = self.exec(params, &check)?;
        if !output.success() || output.stdout.trim().is_empty() {
            return Err(AppError::external(
                format!("Connected to {}", params.name),
                format!("{} was not found on the remote PATH", binary),
            ));
        }
        Ok(())
    }

    fn exec(&self, params: &RemoteParams, command: &RemoteCommand) -> Result<RemoteOutput> {
        let line = command.command_line()?;
        let session = self.open(params)?;
        let channel_error = |e: ssh2::Error| AppError::external(format!("Remote command failed on {}", params.name), e);

        let mut channel = session.channel_session().map_err(channel_error)?;
        debug!(remote = %params.name, command = %line, "Executing remote command");
        channel.exec(&line).map_err(channel_error)?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| AppError::external(format!("Failed to read remote output from {}", params.name), e))?;
        let mut stderr = String::new();
        if let Err(e) = channel.stderr().read_to_string(&mut stderr) {
            debug!(error = %e, remote = %params.name, "Failed to read remote stderr");
        }

        channel.wait_close().map_err(channel_error)?;
        let status = channel.exit_status().map_err(channel_error)?;

        Ok(RemoteOutput { status, stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;

    fn remote(working: bool) -> RemoteParams {
        RemoteParams {
            name: "bastion".to_string(),
            host: "bastion.example.com".to_string(),
            port: 22,
            username: "deploy".to_string(),
            auth: AuthMethod::Agent,
            working,
        }
    }

    #[test]
    fn test_command_line_quotes_arguments() -> anyhow::Result<()> {
        let command = RemoteCommand::new("mysql-helper")
            .args(["display", "databases"])
            .arg("--profile=it's")
            .arg("--connection=db 1");

        let line = command.command_line()?;
        assert!(line.starts_with("mysql-helper display databases "));
        assert_eq!(
            shlex::split(&line),
            Some(vec![
                "mysql-helper".to_string(),
                "display".to_string(),
                "databases".to_string(),
                "--profile=it's".to_string(),
                "--connection=db 1".to_string(),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_command_line_rejects_nul_bytes() {
        let command = RemoteCommand::new("echo").arg("a\0b");
        assert!(matches!(command.command_line(), Err(AppError::InvalidSelection(_))));
    }

    #[test]
    fn test_parse_methods_adds_agent_alongside_publickey() {
        assert_eq!(parse_methods("publickey,password"), vec!["publickey", "password", "agent"]);
        assert_eq!(parse_methods("password"), vec!["password"]);
    }

    #[test]
    fn test_exec_checked_refuses_untested_remote() {
        let fake = FakeRemote::default();
        let result = exec_checked(&fake, &remote(false), &RemoteCommand::new("true"));

        assert!(matches!(result, Err(AppError::InvalidSelection(_))));
        assert!(fake.commands().is_empty());
    }

    #[test]
    fn test_exec_checked_reports_remote_failure() {
        let fake = FakeRemote::default();
        fake.push_output(RemoteOutput { status: 1, stdout: String::new(), stderr: "no such profile\n".to_string() });

        match exec_checked(&fake, &remote(true), &RemoteCommand::new("mysql-helper")) {
            Err(AppError::ExternalFailure { detail, .. }) => assert_eq!(detail, "no such profile"),
            other => panic!("expected external failure, got {:?}", other),
        }
        assert_eq!(fake.commands().len(), 1);
    }
}
