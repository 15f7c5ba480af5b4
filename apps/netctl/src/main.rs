use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use network_core::{HttpRemoteStore, NetworkClient, NetworkHandle};
use shared::domain::{CategoryView, ConnectionId, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "netctl", about = "Inspect and change connection relationships")]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    api_prefix: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a category and resolve the status of everyone in it.
    Activate {
        #[arg(default_value = "connections")]
        category: String,
    },
    /// Send a connection request.
    Send {
        user_id: String,
        #[arg(long, default_value = "")]
        message: String,
    },
    Accept {
        connection_id: String,
    },
    /// Decline a received request or cancel a sent one.
    Decline {
        connection_id: String,
    },
    Remove {
        connection_id: String,
    },
    /// Resolve relationship status for one or more users.
    Status {
        #[arg(required = true)]
        user_ids: Vec<String>,
    },
    Mutual {
        user_id: String,
    },
    /// Show the profile of a connected user.
    Profile {
        user_id: String,
    },
    Count {
        user_id: Option<String>,
    },
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.server_url {
            settings.server_url = v.clone();
        }
        if let Some(v) = &self.api_prefix {
            settings.api_prefix = v.clone();
        }
        if let Some(v) = &self.user_id {
            settings.user_id = Some(v.clone());
        }
        if let Some(v) = self.timeout_secs {
            settings.request_timeout_secs = Some(v);
        }
    }
}

fn connect(settings: &Settings) -> Result<Arc<dyn NetworkHandle>> {
    let user_id = settings
        .user_id
        .clone()
        .context("no user id configured; pass --user-id or set NETWORK_USER_ID")?;
    let base_url = settings.base_url()?;

    let mut http = reqwest::Client::builder();
    if let Some(secs) = settings.request_timeout_secs {
        http = http.timeout(Duration::from_secs(secs));
    }
    let http = http.build().context("failed to build http client")?;

    info!(%base_url, %user_id, "netctl: connecting");
    let remote = Arc::new(HttpRemoteStore::with_client(http, base_url));
    let client: Arc<dyn NetworkHandle> = NetworkClient::new(UserId::new(user_id), remote);
    Ok(client)
}

async fn print_category(handle: &dyn NetworkHandle, category: CategoryView) -> Result<()> {
    let report = handle
        .activate(category.clone())
        .await
        .with_context(|| format!("failed to activate {category}"))?;
    let entries = handle.get_category(&category);
    println!(
        "{category}: {} users ({} statuses requested, {} shared)",
        entries.len(),
        report.requested,
        report.coalesced
    );
    for entry in entries {
        let connection = entry
            .connection_id
            .as_ref()
            .map(ConnectionId::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{}",
            entry.user_id,
            entry.display_name,
            handle.get_status(&entry.user_id),
            connection
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    args.apply(&mut settings);
    let handle = connect(&settings)?;

    match args.command {
        Command::Activate { category } => {
            print_category(handle.as_ref(), CategoryView::from(category)).await?;
        }
        Command::Send { user_id, message } => {
            let outcome = handle
                .send_connection_request(&UserId::new(user_id.clone()), &message)
                .await
                .with_context(|| format!("failed to send a request to {user_id}"))?;
            println!("send {user_id}: {outcome:?}");
        }
        Command::Accept { connection_id } => {
            let outcome = handle
                .accept_connection_request(&ConnectionId::new(connection_id.clone()))
                .await
                .with_context(|| format!("failed to accept {connection_id}"))?;
            println!("accept {connection_id}: {outcome:?}");
        }
        Command::Decline { connection_id } => {
            let outcome = handle
                .decline_connection_request(&ConnectionId::new(connection_id.clone()))
                .await
                .with_context(|| format!("failed to decline {connection_id}"))?;
            println!("decline {connection_id}: {outcome:?}");
        }
        Command::Remove { connection_id } => {
            let outcome = handle
                .remove_connection(&ConnectionId::new(connection_id.clone()))
                .await
                .with_context(|| format!("failed to remove {connection_id}"))?;
            println!("remove {connection_id}: {outcome:?}");
        }
        Command::Status { user_ids } => {
            let user_ids: Vec<UserId> = user_ids.into_iter().map(UserId::new).collect();
            handle
                .resolve_statuses(user_ids.clone())
                .await
                .context("failed to resolve statuses")?;
            for user_id in &user_ids {
                println!("{user_id}\t{}", handle.get_status(user_id));
            }
        }
        Command::Mutual { user_id } => {
            let response = handle
                .mutual_connections(&UserId::new(user_id.clone()))
                .await
                .with_context(|| format!("failed to fetch mutual connections with {user_id}"))?;
            println!("mutual connections with {user_id}: {}", response.mutual_connections.len());
            for entry in &response.mutual_connections {
                println!("  {}\t{}", entry.user_id, entry.display_name);
            }
            println!("other connections: {}", response.other_connections.len());
        }
        Command::Profile { user_id } => {
            let profile = handle
                .connected_profile(&UserId::new(user_id.clone()))
                .await
                .with_context(|| format!("failed to fetch profile of {user_id}"))?;
            println!("{}\t{}", profile.display_name, profile.headline);
            if let Some(email) = &profile.email {
                println!("email: {email}");
            }
            if let Some(date) = profile
                .connection_info
                .as_ref()
                .and_then(|info| info.connection_date.as_deref())
            {
                println!("connected since {date}");
            }
        }
        Command::Count { user_id } => {
            let user_id = user_id
                .map(UserId::new)
                .unwrap_or_else(|| handle.current_user().clone());
            let count = handle
                .connection_count(&user_id)
                .await
                .with_context(|| format!("failed to count connections of {user_id}"))?;
            println!("{user_id}: {count} connections");
        }
    }

    Ok(())
}
