//! Process configuration.
//!
//! Everything the server needs is parsed once at startup and handed
//! around explicitly; there is no ambient global state.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command line configuration for the media server.
#[derive(Debug, Clone, Parser)]
#[command(name = "vidserve", version, about = "Range-aware HTTP media serving")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:5101")]
    pub listen: SocketAddr,

    /// Directory containing the media files to serve.
    #[arg(long, default_value = "./media")]
    pub media_dir: PathBuf,

    /// Directory for cover images.
    #[arg(long, default_value = "./covers")]
    pub covers_dir: PathBuf,

    /// Maximum accepted upload size, in mebibytes.
    #[arg(long, default_value_t = 1024)]
    pub max_upload_mib: u64,

    /// Seconds between library rescans, also the listing cache TTL.
    #[arg(long, default_value_t = 300)]
    pub refresh_secs: u64,

    /// Optional directory of static assets served at the root.
    #[arg(long)]
    pub assets_dir: Option<PathBuf>,
}

impl Config {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mib * 1024 * 1024
    }

    /// Creates the media and cover directories if missing.
    pub fn ensure_directories(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.media_dir)?;
        std::fs::create_dir_all(&self.covers_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["vidserve"]).unwrap();
        assert_eq!(
            "127.0.0.1:5101".parse::<std::net::SocketAddr>().unwrap(),
            config.listen
        );
        assert_eq!(1024 * 1024 * 1024, config.max_upload_bytes());
        assert_eq!(300, config.refresh_secs);
        assert!(config.assets_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "vidserve",
            "--listen",
            "0.0.0.0:8080",
            "--media-dir",
            "/srv/media",
            "--max-upload-mib",
            "8",
        ])
        .unwrap();
        assert_eq!(
            "0.0.0.0:8080".parse::<std::net::SocketAddr>().unwrap(),
            config.listen
        );
        assert_eq!(8 * 1024 * 1024, config.max_upload_bytes());
    }
}
