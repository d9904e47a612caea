use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use modreg_core::artifact::{ArtifactManager, LayerSource};
use modreg_core::blobclient::{BlobClient, HttpBlobClient, NoCredential};
use modreg_core::cache::CacheEntry;
use modreg_core::config::EngineConfig;
use modreg_core::dispatcher::ModuleDispatcher;
use modreg_core::reference::{self, ModuleReference};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Pull { reference: String },
    Push {
        reference: String,
        #[arg(long)]
        file: PathBuf,
    },
    Restore { references: Vec<String> },
    CacheStats { reference: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let cache_root = args.cache_dir.unwrap_or_else(default_cache_dir);
    let config = EngineConfig::from_env(cache_root);

    match args.command {
        Command::Pull { reference } => {
            let parsed = reference::parse(&reference)?;
            let oci = reference::require_oci(&parsed)?;
            let client: Arc<dyn BlobClient> =
                Arc::new(HttpBlobClient::new(oci.registry.clone(), oci.repository.clone(), Arc::new(NoCredential))?);
            ArtifactManager::new(client, &config).pull(oci).await?;
            info!("pulled {reference}");
        }
        Command::Push { reference, file } => {
            let parsed = reference::parse(&reference)?;
            let oci = reference::require_oci(&parsed)?;
            let client: Arc<dyn BlobClient> =
                Arc::new(HttpBlobClient::new(oci.registry.clone(), oci.repository.clone(), Arc::new(NoCredential))?);
            let bytes = std::fs::read(&file)?;
            let title = file.file_name().and_then(|n| n.to_str()).unwrap_or("module").to_string();
            ArtifactManager::new(client, &config)
                .push(oci, bytes::Bytes::new(), vec![LayerSource::titled(title, bytes)])
                .await?;
            info!("pushed {reference}");
        }
        Command::Restore { references } => {
            let dispatcher = ModuleDispatcher::new(config);
            let parsed = dispatcher.valid_references(&references);
            let did_work = dispatcher.restore(&parsed).await;
            println!("did_work={did_work}");
            let mut any_failed = false;
            for reference in &parsed {
                if let Some(err) = dispatcher.try_get_error(reference) {
                    eprintln!("{reference}: {err}");
                    any_failed = true;
                }
            }
            if any_failed {
                std::process::exit(1);
            }
        }
        Command::CacheStats { reference } => {
            let parsed = reference::parse(&reference)?;
            match &parsed {
                ModuleReference::Oci(oci) => {
                    let entry = CacheEntry::locate(&config.cache_root, oci);
                    println!("path={} populated={}", entry.path().display(), entry.is_populated().await);
                }
                ModuleReference::Local { path } => {
                    println!("local reference resolves to {path}");
                }
            }
        }
    }

    Ok(())
}

fn default_cache_dir() -> PathBuf {
    std::env::var("MODREG_CACHE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share/modreg")
        })
}
