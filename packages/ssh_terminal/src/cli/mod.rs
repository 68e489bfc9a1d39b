#[cfg(unix)]
mod attach;
#[cfg(unix)]
mod terminal;

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use ssh_session::{Credentials, FileConfig, HttpTokenSource, SessionConfig, load_config};

#[cfg(unix)]
use attach::AttachOutcome;

/// Everything `sshterm connect` needs from the command line.
pub struct ConnectRequest {
    pub host_id: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity: Option<PathBuf>,
    pub base_url: Option<String>,
}

/// Resolve configuration: defaults, then `config.toml`, then `SSHTERM_*`.
fn resolve_config(config_path: &Path, base_url: Option<String>) -> Result<FileConfig> {
    let mut fc: FileConfig = load_config(config_path)
        .extract()
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(url) = base_url {
        fc.server.base_url = Some(url);
    }
    Ok(fc)
}

pub async fn connect_command(config_path: &Path, req: ConnectRequest) -> Result<()> {
    let fc = resolve_config(config_path, req.base_url.clone())?;
    let config = SessionConfig::from_file(&fc)?;
    let tokens = HttpTokenSource::new(
        config.endpoint.clone(),
        config.session_cookie.as_deref(),
        config.transport.connect_timeout,
    )?;

    let credentials = prompt_credentials(&req).await?;
    credentials.validate()?;

    run_session(&req.host_id, config, tokens, credentials).await
}

#[cfg(unix)]
async fn run_session(
    host_id: &str,
    config: SessionConfig,
    tokens: HttpTokenSource,
    credentials: Credentials,
) -> Result<()> {
    match attach::attach(host_id, config, tokens, credentials).await? {
        AttachOutcome::Failed(err) => anyhow::bail!(err),
        AttachOutcome::Detached | AttachOutcome::Ended => Ok(()),
    }
}

#[cfg(not(unix))]
async fn run_session(
    _host_id: &str,
    _config: SessionConfig,
    _tokens: HttpTokenSource,
    _credentials: Credentials,
) -> Result<()> {
    anyhow::bail!("interactive sessions need a Unix terminal")
}

/// Print the effective configuration as TOML.
pub fn config_command(config_path: &Path) -> Result<()> {
    let mut fc = resolve_config(config_path, None)?;
    if fc.server.session_cookie.is_some() {
        fc.server.session_cookie = Some("<redacted>".to_string());
    }
    println!("# {}", config_path.display());
    print!("{}", toml::to_string_pretty(&fc)?);
    Ok(())
}

/// Ask for whatever the command line did not supply. Runs on a blocking
/// thread because rpassword reads the tty directly.
async fn prompt_credentials(req: &ConnectRequest) -> Result<Credentials> {
    let host_id = req.host_id.clone();
    let user = req.user.clone();
    let port = req.port;
    let identity = req.identity.clone();

    tokio::task::spawn_blocking(move || -> Result<Credentials> {
        let username = match user {
            Some(user) => user,
            None => {
                eprint!("Username for {host_id}: ");
                std::io::stderr().flush()?;
                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line)?;
                line.trim().to_string()
            }
        };

        match identity {
            Some(path) => {
                let key = Zeroizing::new(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read key {}", path.display()))?,
                );
                let passphrase = Zeroizing::new(
                    rpassword::prompt_password("Key passphrase (empty for none): ")
                        .context("Failed to read passphrase")?,
                );
                let passphrase = (!passphrase.is_empty()).then_some(passphrase.as_str());
                Ok(Credentials::private_key(
                    username,
                    key.as_str(),
                    passphrase,
                    port,
                ))
            }
            None => {
                let password = Zeroizing::new(
                    rpassword::prompt_password(format!("{username}@{host_id}'s password: "))
                        .context("Failed to read password")?,
                );
                Ok(Credentials::password(username, password.as_str(), port))
            }
        }
    })
    .await?
}
