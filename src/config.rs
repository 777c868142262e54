//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_CORS_ORIGINS: &str = "*";
pub const DEFAULT_STORAGE_LIMIT: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_UPLOAD_TEMP_TTL_SECS: u64 = 24 * 60 * 60;
pub const UPLOAD_CLEAN_INTERVAL_SECS: u64 = 900;
pub const UPLOAD_TEMP_PREFIX: &str = ".upload-";
pub const UPLOAD_TEMP_SUFFIX: &str = ".tmp";
pub const VIEW_CACHE_MAX_AGE_SECS: u64 = 60 * 60;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-cloud", version = VERSION_INFO, about = "AxoCloud personal storage server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "AXO_STORAGE_DIR",
        default_value = ".axo/storage",
        help = "Storage directory for uploaded files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "AXO_CORS_ORIGINS",
        default_value = DEFAULT_CORS_ORIGINS,
        help = "Comma separated CORS origins (* for any, empty to disable)"
    )]
    pub cors_origins: String,
    #[arg(
        long,
        env = "AXO_STORAGE_LIMIT",
        default_value_t = DEFAULT_STORAGE_LIMIT,
        help = "Reported storage quota in bytes"
    )]
    pub storage_limit: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_TEMP_TTL_SECS",
        default_value_t = DEFAULT_UPLOAD_TEMP_TTL_SECS,
        help = "Upload temp cleanup threshold in seconds (0 to disable)"
    )]
    pub upload_temp_ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_any_cors_origin() {
        let args = Args::try_parse_from(["axo-cloud"]).expect("parse defaults");
        assert_eq!(args.cors_origins, DEFAULT_CORS_ORIGINS);
        assert_eq!(args.storage_limit, DEFAULT_STORAGE_LIMIT);

        let args = Args::try_parse_from(["axo-cloud", "--cors-origins", "http://localhost:3000"])
            .expect("parse origins");
        assert_eq!(args.cors_origins, "http://localhost:3000");
    }
}
