//! CLI runner - executes commands

use crate::auth::{AuthCoordinator, CredentialStore, FileCredentialStore, InvalidationReason};
use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::PortalConfig;
use crate::error::{Error, Result, ResultExt};
use crate::http::{HttpClient, RequestConfig};
use crate::retry::retry_on_rate_limit;
use crate::types::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cookie names used when printing stored tokens
const ACCESS_COOKIE: &str = "access_token";
const REFRESH_COOKIE: &str = "refresh_token";

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = self.load_config()?;
        let auth = Self::build_auth(&config)?;

        match &self.cli.command {
            Commands::Login { email, password } => {
                self.login(&config, &auth, email, password.as_deref())
                    .await
            }
            Commands::Logout => self.logout(&auth).await,
            Commands::Status { cookies } => self.status(&config, &auth, *cookies).await,
            Commands::Request {
                method,
                path,
                data,
                query,
                retries,
            } => {
                let client = HttpClient::with_auth(config.http_config(), Arc::clone(&auth))?;
                self.request(&client, *method, path, data.as_deref(), query, *retries)
                    .await
            }
        }
    }

    /// Load the config file and apply command-line overrides
    fn load_config(&self) -> Result<PortalConfig> {
        let mut config = PortalConfig::load(self.cli.config.as_deref())?;

        if let Some(base_url) = &self.cli.base_url {
            config.base_url.clone_from(base_url);
        }
        if let Some(path) = &self.cli.credentials {
            config.credentials.path.clone_from(path);
        }

        config.validate()?;
        debug!(base_url = %config.base_url, "Configuration loaded");
        Ok(config)
    }

    fn build_auth(config: &PortalConfig) -> Result<Arc<AuthCoordinator>> {
        let http_config = config.http_config();
        let client = reqwest::Client::builder()
            .timeout(http_config.timeout)
            .user_agent(&http_config.user_agent)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        let store = Arc::new(FileCredentialStore::new(&config.credentials.path));
        let coordinator = AuthCoordinator::with_client(config.auth_endpoints(), store, client)
            .with_refresh_ttl(config.refresh_ttl())
            .with_listener(Arc::new(|reason: InvalidationReason| {
                eprintln!("Session ended ({reason}). Run `portal-client login` to sign in again.");
            }));

        Ok(Arc::new(coordinator))
    }

    /// Log in, retrying while the login endpoint rate-limits us
    async fn login(
        &self,
        config: &PortalConfig,
        auth: &AuthCoordinator,
        email: &str,
        password: Option<&str>,
    ) -> Result<()> {
        let password = password.ok_or_else(|| {
            Error::config("Password required: pass --password or set PORTAL_PASSWORD")
        })?;

        let status = retry_on_rate_limit(config.retry.into(), move || auth.login(email, password)).await?;
        info!(email, "Login successful");

        self.output_message(&json!({
            "type": "LOGIN",
            "status": status,
        }));
        Ok(())
    }

    async fn logout(&self, auth: &AuthCoordinator) -> Result<()> {
        auth.logout().await?;
        self.output_message(&json!({ "type": "LOGOUT" }));
        Ok(())
    }

    /// Show stored credentials, optionally as `Set-Cookie` values
    async fn status(&self, config: &PortalConfig, auth: &AuthCoordinator, cookies: bool) -> Result<()> {
        let status = auth.status().await?;
        let mut message = json!({
            "type": "STATUS",
            "status": status,
        });

        if cookies {
            let attributes = config.cookie_attributes();
            let credential = auth.store().get().await?;
            let rendered: Vec<String> = credential
                .access_token
                .iter()
                .map(|t| t.set_cookie(ACCESS_COOKIE, &attributes))
                .chain(
                    credential
                        .refresh_token
                        .iter()
                        .map(|t| t.set_cookie(REFRESH_COOKIE, &attributes)),
                )
                .collect();
            message["cookies"] = json!(rendered);
        }

        self.output_message(&message);
        Ok(())
    }

    /// Send one request through the resilient client
    async fn request(
        &self,
        client: &HttpClient,
        method: Method,
        path: &str,
        data: Option<&str>,
        query: &[(String, String)],
        retries: Option<u32>,
    ) -> Result<()> {
        let cancel = CancellationToken::new();
        let _ctrl_c = spawn_ctrl_c_handler(cancel.clone());

        let mut request = RequestConfig::new().cancel_on(cancel);
        for (key, value) in query {
            request = request.query(key.as_str(), value.as_str());
        }
        if let Some(data) = data {
            let body: Value = serde_json::from_str(data).context("Invalid --data JSON")?;
            request = request.json(body);
        }
        if let Some(retries) = retries {
            request = request.retries(retries);
        }

        let started = std::time::Instant::now();
        let response = client.request(method.into(), path, request).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        debug!(status, elapsed = ?started.elapsed(), "Request complete");
        self.output_message(&json!({
            "type": "RESPONSE",
            "status": status,
            "body": body,
        }));
        Ok(())
    }

    /// Print a message in the selected format
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Cancel `token` on Ctrl-C; the handler stops when the guard is dropped
fn spawn_ctrl_c_handler(token: CancellationToken) -> tokio_util::sync::DropGuard {
    let guard = CancellationToken::new();
    let stopped = guard.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = stopped.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    eprintln!("Interrupted, canceling request");
                    token.cancel();
                }
            }
        }
    });
    guard.drop_guard()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, StoredToken};
    use clap::Parser;
    use std::time::Duration;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("portal-client").chain(args.iter().copied()))
    }

    #[test]
    fn test_load_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("creds.json");
        let runner = Runner::new(cli(&[
            "--base-url",
            "https://admin.example.com/api",
            "--credentials",
            creds.to_str().unwrap(),
            "logout",
        ]));

        let config = runner.load_config().unwrap();
        assert_eq!(config.base_url, "https://admin.example.com/api");
        assert_eq!(config.credentials.path, creds);
    }

    #[test]
    fn test_load_config_rejects_bad_base_url() {
        let runner = Runner::new(cli(&["--base-url", "not a url", "status"]));
        assert!(runner.load_config().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.yaml");
        std::fs::write(&path, "base_url: https://file.example.com\ntimeout_secs: 5\n").unwrap();

        let runner = Runner::new(cli(&["-C", path.to_str().unwrap(), "status"]));
        let config = runner.load_config().unwrap();
        assert_eq!(config.timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_logout_removes_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("creds.json");
        FileCredentialStore::new(&creds)
            .set(&Credential {
                access_token: Some(StoredToken::new("access-1", None)),
                refresh_token: Some(StoredToken::new("refresh-1", None)),
            })
            .await
            .unwrap();

        let runner = Runner::new(cli(&[
            "--base-url",
            "http://localhost:8000/api",
            "--credentials",
            creds.to_str().unwrap(),
            "logout",
        ]));
        runner.run().await.unwrap();
        assert!(!creds.exists());
    }

    #[tokio::test]
    async fn test_login_requires_password() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PortalConfig::default();
        config.credentials.path = dir.path().join("creds.json");
        let auth = Runner::build_auth(&config).unwrap();
        let runner = Runner::new(cli(&["logout"]));

        let err = runner
            .login(&config, &auth, "admin@example.com", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Password required"));
        assert!(!config.credentials.path.exists());
    }

    #[tokio::test]
    async fn test_ctrl_c_handler_stops_with_guard() {
        let token = CancellationToken::new();
        let guard = spawn_ctrl_c_handler(token.clone());
        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
    }
}
