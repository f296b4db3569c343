use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dermascan-server",
    version,
    about = "Serves the skin lesion classifier over HTTP"
)]
pub struct ServerConfig {
    #[arg(long, env = "APP_NAME", default_value = "Skin Cancer Detection API")]
    pub app_name: String,
    /// Lowers the default log level to `debug`.
    #[arg(
        long,
        env = "DEBUG",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub debug: bool,
    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,
    /// Weights artifact written by `dermascan-train`.
    #[arg(long, env = "MODEL_PATH", default_value = "model/skin_cancer_model.mpk")]
    pub model_path: PathBuf,
    /// Label map written by `dermascan-train`.
    #[arg(long, env = "LABELS_PATH", default_value = "model/labels.json")]
    pub labels_path: PathBuf,
    /// Accepted for compatibility with existing deployments. Nothing reads it.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,
    /// Load the model before accepting traffic instead of on the first request.
    #[arg(
        long,
        env = "EAGER_LOAD",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub eager_load: bool,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
