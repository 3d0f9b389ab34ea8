use crate::client::{ClientConfig, TorrentClient};
use crate::error::Result;
use crate::transfer::DEFAULT_MAX_CONNECTIONS;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minnow")]
#[command(about = "A single-file BitTorrent client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent, then keep seeding it
    Download {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Download directory
        #[arg(short, long, default_value = "./downloads")]
        output: String,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Number of simultaneous peer connections
        #[arg(short, long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
        connections: usize,
    },

    /// Seed an already-downloaded file
    Seed {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Path to the completed file; defaults to the torrent's name
        /// in the current directory
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Number of simultaneous peer connections
        #[arg(short, long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
        connections: usize,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Download {
                torrent,
                output,
                port,
                connections,
            } => {
                let config = ClientConfig {
                    download_dir: output.clone(),
                    listen_port: *port,
                    max_connections: *connections,
                };

                let client = TorrentClient::new(config);
                client.download(torrent).await?;
            }

            Commands::Seed {
                torrent,
                file,
                port,
                connections,
            } => {
                let config = ClientConfig {
                    listen_port: *port,
                    max_connections: *connections,
                    ..ClientConfig::default()
                };

                let client = TorrentClient::new(config);
                client.seed(torrent, file.as_deref()).await?;
            }

            Commands::Info { torrent } => {
                self.show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }

    async fn show_torrent_info(&self, torrent_path: &PathBuf) -> Result<()> {
        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;

        println!("Torrent Information");
        println!("==================");
        println!("Name: {}", metainfo.info.name);
        println!("Tracker: {}", metainfo.announce);
        println!("Total Size: {} bytes", metainfo.info.total_length);
        println!("Piece Length: {} bytes", metainfo.info.piece_length);
        println!("Number of Pieces: {}", metainfo.info.piece_count());
        println!("Info Hash: {}", metainfo.info_hash_hex());

        Ok(())
    }
}
