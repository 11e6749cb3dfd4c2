use std::{
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use trivet::{
    config::Config,
    data_model::InvokeRequest,
    protocol::Client,
    service::Service,
    tracing::setup_tracing,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(version, about = "Serve locally built functions behind an emulated cloud gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the declared functions locally
    Serve {
        #[arg(short, long, value_name = "config file", default_value = "trivet.yaml")]
        config: PathBuf,
    },
    /// Invoke a function through a running trivet instance
    Invoke {
        /// Function name to invoke
        function: String,
        /// Payload file; stdin is read when omitted
        payload: Option<PathBuf>,
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        address: String,
    },
    /// Build the declared function packages into the runtime directory
    Build {
        #[arg(short, long, value_name = "config file", default_value = "trivet.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => {
            let config = Config::from_path(&config)?;
            setup_tracing();
            Service::new(config).start().await
        }
        Commands::Invoke {
            function,
            payload,
            address,
        } => invoke(&function, payload.as_deref(), &address).await,
        Commands::Build { config } => {
            let config = Config::from_path(&config)?;
            build_all(&config)
        }
    }
}

async fn invoke(function: &str, payload: Option<&Path>, address: &str) -> Result<()> {
    let payload = match payload {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read payload file {}", path.display()))?,
        None => {
            let mut payload = Vec::new();
            std::io::stdin()
                .read_to_end(&mut payload)
                .context("failed to read payload from stdin")?;
            payload
        }
    };

    let mut client = Client::connect(address).await?;
    let request = InvokeRequest {
        request_id: Uuid::new_v4().to_string(),
        payload,
    };

    match client.invoke(function, request).await? {
        Ok(response) => {
            if let Some(record) = response.error {
                eprintln!("Error: {}", record.message);
                std::process::exit(1);
            }
            println!("{}", String::from_utf8_lossy(&response.payload));
            Ok(())
        }
        Err(record) => {
            eprintln!("Error: {}", record.message);
            std::process::exit(1);
        }
    }
}

fn build_all(config: &Config) -> Result<()> {
    let out_dir = config.ensure_runtime_dir()?;
    for (name, function) in &config.functions {
        let Some(package) = &function.package else {
            continue;
        };
        build_function(&out_dir, name, package)?;
    }
    Ok(())
}

/// Compiles one function package and drops its executable in the runtime
/// directory. The package must expose a bin target named after the function.
fn build_function(out_dir: &Path, name: &str, package: &str) -> Result<()> {
    println!("Fn {name}: cargo build --release --bin {name} ({package})");

    let target_dir = out_dir.join("target");
    let status = std::process::Command::new("cargo")
        .args(["build", "--release", "--bin", name])
        .arg("--manifest-path")
        .arg(Path::new(package).join("Cargo.toml"))
        .arg("--target-dir")
        .arg(&target_dir)
        .status()
        .context("failed to run cargo build")?;
    if !status.success() {
        anyhow::bail!("function {name}: cargo build failed");
    }

    let built = target_dir.join("release").join(name);
    let dest = out_dir.join(name);
    // Unlink first so a running instance keeps its old inode and the watcher
    // sees a fresh mtime on the new one.
    let _ = std::fs::remove_file(&dest);
    std::fs::copy(&built, &dest).with_context(|| {
        format!(
            "failed to install {} as {}",
            built.display(),
            dest.display()
        )
    })?;
    Ok(())
}
