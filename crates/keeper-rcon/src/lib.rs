use anyhow::{Context, Result};
use async_trait::async_trait;
use minecraft_client_rs::Client;
use std::path::Path;
use tokio::fs;
use tokio::task::spawn_blocking;

/// Command transport to the live server console. The backup engine only ever
/// sends a command and reads the free-text reply, so this is the whole seam.
#[async_trait]
pub trait ServerConsole: Send + Sync {
    async fn execute(&self, command: &str) -> Result<String>;
}

pub struct ConsoleSettings {
    pub address: String,
    pub password: String,
}

/// Settings the engine reads out of `server.properties`.
pub struct ServerProperties {
    pub level_name: Option<String>,
    pub language: Option<String>,
    pub console: Option<ConsoleSettings>,
}

pub struct RconConsole {
    address: String,
    password: String,
}

impl RconConsole {
    pub fn new(address: String, password: String) -> Self {
        Self { address, password }
    }

    pub fn from_settings(settings: ConsoleSettings) -> Self {
        Self::new(settings.address, settings.password)
    }
}

#[async_trait]
impl ServerConsole for RconConsole {
    async fn execute(&self, command: &str) -> Result<String> {
        let address = self.address.clone();
        let password = self.password.clone();
        let command = command.to_string();

        spawn_blocking(move || {
            let mut client = Client::new(address)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            client
                .authenticate(password)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            let response = client
                .send_command(command)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            client
                .close()
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            Ok::<_, anyhow::Error>(response.body)
        })
        .await
        .with_context(|| "RCON task failed")?
    }
}

pub async fn load_server_properties(server_dir: &Path) -> Result<Option<ServerProperties>> {
    let properties_path = server_dir.join("server.properties");
    let content = match fs::read_to_string(&properties_path).await {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    Ok(Some(parse_server_properties(&content)))
}

pub fn parse_server_properties(content: &str) -> ServerProperties {
    let mut level_name: Option<String> = None;
    let mut language: Option<String> = None;
    let mut enabled = false;
    let mut port: Option<u16> = None;
    let mut password: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "level-name" => {
                if !value.is_empty() {
                    level_name = Some(value.to_string());
                }
            }
            "language" => {
                if !value.is_empty() {
                    language = Some(value.to_string());
                }
            }
            "enable-rcon" => enabled = value.eq_ignore_ascii_case("true"),
            "rcon.port" => port = value.parse::<u16>().ok(),
            "rcon.password" => {
                if !value.is_empty() {
                    password = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let console = if enabled {
        password.map(|password| ConsoleSettings {
            address: format!("127.0.0.1:{}", port.unwrap_or(25575)),
            password,
        })
    } else {
        None
    };

    ServerProperties {
        level_name,
        language,
        console,
    }
}
