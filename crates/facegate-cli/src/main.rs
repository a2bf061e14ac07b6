use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face verification CLI")]
struct Cli {
    /// Base URL of the facegated HTTP API.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify an image file against the reference catalog
    Verify {
        /// Path to a JPEG/PNG image
        image: PathBuf,
    },
    /// Show the most recently verified identity
    User,
    /// List known identities
    Users,
    /// Add a reference image for an identity
    Add {
        name: String,
        /// Upload this image; captures from the daemon camera when omitted
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Remove an identity and its reference images
    Remove { name: String },
    /// Control continuous camera verification
    Continuous {
        #[arg(value_enum)]
        action: ContinuousAction,
    },
    /// Rebuild the catalog from the on-disk image tree
    Refresh,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContinuousAction {
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let server = cli.server.trim_end_matches('/').to_string();

    let response = match cli.command {
        Commands::Verify { image } => {
            let form = image_form(&image)?;
            client
                .post(format!("{server}/verify"))
                .multipart(form)
                .send()
                .await
        }
        Commands::User => client.get(format!("{server}/user")).send().await,
        Commands::Users => client.get(format!("{server}/users")).send().await,
        Commands::Add { name, image } => match image {
            Some(image) => {
                let form = image_form(&image)?;
                client
                    .post(format!("{server}/users/{name}/references"))
                    .multipart(form)
                    .send()
                    .await
            }
            None => client.get(format!("{server}/add_user/{name}")).send().await,
        },
        Commands::Remove { name } => {
            client.delete(format!("{server}/users/{name}")).send().await
        }
        Commands::Continuous { action } => {
            let verb = match action {
                ContinuousAction::Start => "start",
                ContinuousAction::Stop => "stop",
            };
            client
                .get(format!("{server}/continuous/{verb}"))
                .send()
                .await
        }
        Commands::Refresh => {
            client
                .post(format!("{server}/catalog/refresh"))
                .send()
                .await
        }
    }
    .context("request to facegated failed")?;

    let status = response.status();
    let body = response.text().await.context("failed to read response")?;
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }

    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }
    Ok(())
}

/// Build the multipart form the daemon expects: one `image1` file field.
fn image_form(path: &PathBuf) -> Result<reqwest::multipart::Form> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/octet-stream")?;
    Ok(reqwest::multipart::Form::new().part("image1", part))
}
