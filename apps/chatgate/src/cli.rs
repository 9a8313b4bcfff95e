use std::path::PathBuf;

use anyhow::Context;
use chatgate_provider_impl::RegistrySettings;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
#[command(name = "chatgate", version, about = "OpenAI-compatible gateway over vendor web chats")]
pub(crate) struct Cli {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Directory holding one credential file per provider.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Outbound proxy for upstream calls, e.g. `socks5://127.0.0.1:1080`.
    #[arg(long)]
    pub proxy: Option<String>,
    /// Guards `/admin/*`; unset leaves the admin surface open.
    #[arg(long)]
    pub admin_key: Option<String>,
    /// TOML file with defaults; flags override it.
    #[arg(long, env = "CHATGATE_CONFIG")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "CHATGATE_LOG_JSON")]
    pub log_json: bool,
    /// Also write daily-rolling log files here.
    #[arg(long, env = "CHATGATE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct UpstreamOverrides {
    #[serde(default)]
    pub deepseek_base_url: Option<String>,
    #[serde(default)]
    pub qwen_base_url: Option<String>,
    #[serde(default)]
    pub claude_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub admin_key: Option<String>,
    #[serde(default)]
    pub upstream: UpstreamOverrides,
}

impl GlobalConfig {
    /// Defaults, then the TOML file, then `CHATGATE_*` variables, then flags.
    pub(crate) fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000_i64)?
            .set_default("data_dir", "data")?;
        if let Some(path) = &cli.config {
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("CHATGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("host", cli.host.clone())?
            .set_override_option("port", cli.port.map(i64::from))?
            .set_override_option(
                "data_dir",
                cli.data_dir
                    .as_ref()
                    .map(|dir| dir.to_string_lossy().into_owned()),
            )?
            .set_override_option("proxy", cli.proxy.clone())?
            .set_override_option("admin_key", cli.admin_key.clone())?
            .build()
            .context("failed to read configuration")?;
        let mut config: GlobalConfig = config
            .try_deserialize()
            .context("invalid configuration")?;
        config.proxy = non_empty(config.proxy);
        config.admin_key = non_empty(config.admin_key);
        Ok(config)
    }

    pub(crate) fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            proxy: self.proxy.clone(),
            deepseek_base_url: self.upstream.deepseek_base_url.clone(),
            qwen_base_url: self.upstream.qwen_base_url.clone(),
            claude_base_url: self.upstream.claude_base_url.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "host = \"0.0.0.0\"\nport = 8080\nadmin_key = \"from-file\"\n\n[upstream]\nqwen_base_url = \"http://127.0.0.1:9\""
        )
        .unwrap();
        let cli = Cli::parse_from([
            "chatgate",
            "--port",
            "9000",
            "--proxy",
            " ",
            "--config",
            file.path().to_str().unwrap(),
        ]);
        let config = GlobalConfig::load(&cli).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.admin_key.as_deref(), Some("from-file"));
        assert_eq!(config.proxy, None);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(
            config.registry_settings().qwen_base_url.as_deref(),
            Some("http://127.0.0.1:9")
        );
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }
}
