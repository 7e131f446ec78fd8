//! artifact-registry - command-line client for a versioned artifact registry
//!
//! Talks to an S3-compatible bucket configured through `REGISTRY_*`
//! environment variables.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use artifact_registry::cache::CachedRegistry;
use artifact_registry::config::RegistryConfig;
use artifact_registry::materializer::{builtin::FILES_ID, MaterializerSet};
use artifact_registry::registry::{ConflictPolicy, ObjectKey, ObjectMetadata, PullOptions, PushOptions};
use artifact_registry::transport::S3Transport;

/// CLI command
#[derive(Debug)]
enum Command {
    /// Upload a directory as one object
    Push {
        key: ObjectKey,
        source: PathBuf,
        on_conflict: ConflictPolicy,
    },
    /// Download an object into a directory
    Pull { key: ObjectKey, dest: PathBuf },
    /// Delete one version or every version
    Delete { name: String, version: Option<String> },
    /// List object names
    List,
    /// List versions of one object
    Versions { name: String },
    /// Check whether an object exists
    Has { key: ObjectKey },
    /// Print object metadata
    Info { key: ObjectKey },
    /// Show connection and cache status
    Status,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"artifact-registry - Versioned artifact registry on S3-compatible storage

USAGE:
    artifact-registry push <name> <version> <dir> [--skip|--overwrite]
    artifact-registry pull <name> <version> <dest>
    artifact-registry delete <name> [version]
    artifact-registry list
    artifact-registry versions <name>
    artifact-registry has <name> <version>
    artifact-registry info <name> <version>
    artifact-registry status
    artifact-registry help

COMMANDS:
    push      Upload every file under <dir> as <name>@<version>
    pull      Download <name>@<version> into <dest> and verify its hash
    delete    Delete one version, or every version when none is given
    list      List object names
    versions  List versions of an object, oldest first
    has       Exit with status 0 if the object exists, 1 otherwise
    info      Print the metadata document of an object
    status    Show store health, recent errors and cache statistics
    help      Show this help message

    <version> may be "latest" wherever an existing object is read.

EXAMPLES:
    artifact-registry push proj:model 1.0.0 ./model
    artifact-registry pull proj:model latest ./restored
    artifact-registry delete proj:model 1.0.0

ENVIRONMENT:
    REGISTRY_ENDPOINT            Storage endpoint, e.g. localhost:9000 (required)
    REGISTRY_ACCESS_KEY          Access key (required)
    REGISTRY_SECRET_KEY          Secret key (required)
    REGISTRY_BUCKET              Bucket name (required)
    REGISTRY_REGION              Signing region (default us-east-1)
    REGISTRY_SECURE              Use HTTPS (default true)
    REGISTRY_PREFIX              Key prefix inside the bucket
    REGISTRY_CACHE_DIR           Local cache root
    REGISTRY_LOCK_TIMEOUT_SECS   Lock acquisition timeout (default 30)
    REGISTRY_MUTABLE             Allow overwrites for a new registry (default false)
    REGISTRY_VERSIONED           Version saves for a new registry (default true)
    REGISTRY_CONDITIONAL_WRITES  Store supports If-None-Match (default true)
    RUST_LOG                     Log filter (trace, debug, info, warn, error)
"#
    );
}

fn key_arg(args: &[String], name: usize, version: usize) -> Result<ObjectKey> {
    let key = ObjectKey::new(args[name].clone(), args[version].clone());
    artifact_registry::registry::key::validate_name(&key.name)?;
    artifact_registry::registry::key::validate_version(&key.version)?;
    Ok(key)
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "push" => {
            if args.len() < 5 {
                return Err(anyhow!(
                    "Usage: artifact-registry push <name> <version> <dir> [--skip|--overwrite]"
                ));
            }
            let on_conflict = match args.get(5).map(String::as_str) {
                None => ConflictPolicy::Error,
                Some("--skip") => ConflictPolicy::Skip,
                Some("--overwrite") => ConflictPolicy::Overwrite,
                Some(other) => return Err(anyhow!("Unknown push flag: {}", other)),
            };
            Ok(Command::Push {
                key: key_arg(&args, 2, 3)?,
                source: PathBuf::from(&args[4]),
                on_conflict,
            })
        }
        "pull" => {
            if args.len() < 5 {
                return Err(anyhow!("Usage: artifact-registry pull <name> <version> <dest>"));
            }
            Ok(Command::Pull {
                key: key_arg(&args, 2, 3)?,
                dest: PathBuf::from(&args[4]),
            })
        }
        "delete" => {
            if args.len() < 3 {
                return Err(anyhow!("Usage: artifact-registry delete <name> [version]"));
            }
            Ok(Command::Delete {
                name: args[2].clone(),
                version: args.get(3).cloned(),
            })
        }
        "list" => Ok(Command::List),
        "versions" => {
            if args.len() < 3 {
                return Err(anyhow!("Usage: artifact-registry versions <name>"));
            }
            Ok(Command::Versions {
                name: args[2].clone(),
            })
        }
        "has" | "info" => {
            if args.len() < 4 {
                return Err(anyhow!("Usage: artifact-registry {} <name> <version>", args[1]));
            }
            let key = key_arg(&args, 2, 3)?;
            Ok(if args[1] == "has" {
                Command::Has { key }
            } else {
                Command::Info { key }
            })
        }
        "status" => Ok(Command::Status),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Connect to the configured store, keeping the transport for status reporting
fn connect(config: &RegistryConfig) -> Result<(Arc<S3Transport>, CachedRegistry)> {
    let transport = Arc::new(
        S3Transport::connect(&config.s3_settings())
            .context("Failed to create storage client")?
            .with_conditional_writes(config.conditional_writes),
    );
    let registry = CachedRegistry::open(
        transport.clone(),
        config.backend_options(),
        config.cache_dir.clone(),
        MaterializerSet::builtin(),
    )
    .with_context(|| format!("Failed to open registry in bucket {}", config.bucket))?;
    Ok((transport, registry))
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = RegistryConfig::from_env().context("Invalid registry configuration")?;
    let (transport, registry) = connect(&config)?;
    let remote = registry.remote();

    match command {
        Command::Push {
            key,
            source,
            on_conflict,
        } => {
            let options = PushOptions {
                on_conflict,
                acquire_lock: on_conflict == ConflictPolicy::Overwrite,
            };
            let draft = ObjectMetadata::new("files", FILES_ID);
            let batch = remote.push_batch(&[key.clone()], &[source.clone()], &[draft], &options)?;
            for item in &batch {
                match item.error() {
                    Some(e) => {
                        error!(object = %item.key, error = %e, "Push failed");
                        return Err(anyhow!("push of {} failed: {}", item.key, e));
                    }
                    None => {
                        info!(object = %item.key, source = %source.display(), status = item.status(), "Push finished");
                        println!("{}\t{}", item.key, item.status());
                    }
                }
            }
        }
        Command::Pull { key, dest } => {
            let meta = remote
                .pull(
                    &key,
                    &dest,
                    None,
                    &PullOptions {
                        acquire_lock: remote.settings()?.mutable,
                        verify_hash: true,
                    },
                )
                .with_context(|| format!("Failed to pull {}", key))?;
            println!("Pulled {} ({} files) into {}", key, meta.files.len(), dest.display());
        }
        Command::Delete { name, version } => {
            registry
                .delete(&name, version.as_deref())
                .with_context(|| format!("Failed to delete {}", name))?;
            match version {
                Some(version) => println!("Deleted {}@{}", name, version),
                None => println!("Deleted every version of {}", name),
            }
        }
        Command::List => {
            let names = registry.list_objects()?;
            if names.is_empty() {
                println!("Registry is empty.");
            }
            for name in names {
                println!("{}", name);
            }
        }
        Command::Versions { name } => {
            for version in registry.list_versions(&name)? {
                println!("{}", version);
            }
        }
        Command::Has { key } => {
            let exists = registry.has_object(&key)?;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        Command::Info { key } => {
            let meta = registry.fetch_metadata(&key)?;
            println!("{}", String::from_utf8_lossy(&meta.to_json()?));
        }
        Command::Status => {
            let settings = remote.settings()?;
            println!("Store:       {}", remote.identity());
            println!("Health:      {}", transport.client().health_status());
            println!("Cache:       {}", registry.cache().identity());
            println!("Mutable:     {}", settings.mutable);
            println!("Versioned:   {}", settings.versioned);
            println!("Materializers:");
            for (class, id) in &settings.materializers {
                println!("  {} -> {}", class, id);
            }
            let errors = transport.client().recent_errors();
            if !errors.is_empty() {
                println!("Recent errors:");
                for entry in errors {
                    println!("  [{}] {} {}: {}", entry.timestamp, entry.operation, entry.key, entry.error);
                }
            }
            registry.log_metrics();
        }
        Command::Help => print_help(),
    }

    Ok(())
}
