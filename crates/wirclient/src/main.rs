// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::{Parser, Subcommand};
use tracing::error;

use wirclient::transport::socket::{self, SocketOpts};
use wirclient::{Inspector, InspectorConfig, SelectAppOpts, Transport};

#[derive(Parser)]
#[command(name = "wirclient", about = "Probe Apple's Web Inspector daemon")]
struct Cli {
    #[command(flatten)]
    config: InspectorConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List debuggable applications.
    Apps,
    /// Select an application and list its inspectable pages.
    Pages {
        /// Bundle id to prefer; defaults to the WebContent probe set.
        #[arg(long)]
        bundle: Option<String>,
    },
    /// Select the first page of an application and navigate it.
    Navigate {
        #[arg(long)]
        bundle: Option<String>,
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let transport = connect_transport(&cli.config).await?;
    let inspector = Inspector::connect(transport, cli.config.clone()).await?;

    match cli.command {
        Command::Apps => {
            for (id, app) in inspector.apps().await {
                println!(
                    "{id}  {}  active={}  proxy={}  automation={}",
                    app.bundle_id, app.is_active, app.is_proxy, app.is_automation_enabled(),
                );
            }
        }
        Command::Pages { bundle } => {
            let opts = select_opts(bundle);
            match inspector.select_app(&opts).await? {
                Some((app_id, pages)) => {
                    for page in pages {
                        println!("{app_id}  page {}  {}  {}", page.id, page.url, page.title);
                    }
                }
                None => println!("no debuggable application found"),
            }
        }
        Command::Navigate { bundle, url } => {
            let opts = select_opts(bundle);
            let Some((app_id, pages)) = inspector.select_app(&opts).await? else {
                anyhow::bail!("no debuggable application found");
            };
            let Some(page) = pages.first() else {
                anyhow::bail!("application {app_id} has no inspectable pages");
            };
            inspector.select_page(&app_id, page.id, None).await?;
            inspector.navigate_to(&app_id, page.id, &url).await?;
            println!("navigated {app_id} page {} to {url}", page.id);
        }
    }

    inspector.disconnect().await;
    Ok(())
}

fn select_opts(bundle: Option<String>) -> SelectAppOpts {
    SelectAppOpts { bundle_ids: bundle.into_iter().collect(), ..Default::default() }
}

async fn connect_transport(config: &InspectorConfig) -> anyhow::Result<Transport> {
    let opts = SocketOpts { chunk_size: config.chunk_size, hexdump: config.hexdump };
    let transport = match (&config.proxy_addr, &config.socket) {
        (Some(proxy), Some(socket_path)) => {
            socket::connect_proxy(proxy, socket_path, opts).await?
        }
        (Some(_), None) => anyhow::bail!("--proxy-addr requires --socket"),
        (None, Some(socket_path)) => socket::connect_unix(socket_path, opts).await?,
        (None, None) => socket::connect_tcp(&config.tcp_addr, opts).await?,
    };
    Ok(transport)
}
