use anyhow::Context;
use clap::Parser;
use decoy::{MockError, MockServer, Settings};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "decoy", about = "Programmable HTTP mock server")]
struct Args {
    /// Ports to serve on; repeat for multiple, 0 picks an ephemeral port
    #[arg(short, long)]
    port: Vec<u16>,
    /// Bind address
    #[arg(long)]
    host: Option<String>,
    #[arg(short, long)]
    verbose: bool,
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings =
        Settings::from_env().context("loading configuration from environment")?;
    if !args.port.is_empty() {
        settings.ports = args.port.clone();
    }
    if let Some(host) = &args.host {
        settings.local_bound_ip = host.clone();
    }
    if settings.ports.is_empty() {
        settings.ports = vec![1080];
    }
    settings.validate().context("validating configuration")?;
    Ok(settings)
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(2);
        }
    };

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if settings.event_loop_threads > 0 {
        builder.worker_threads(settings.event_loop_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build runtime: {e}");
            std::process::exit(2);
        }
    };

    runtime.block_on(async move {
        let server = match MockServer::start(settings).await {
            Ok(server) => server,
            Err(e @ MockError::PortBind { .. }) => {
                error!("{e}");
                std::process::exit(1);
            }
            Err(e) => {
                error!("{e}");
                std::process::exit(2);
            }
        };
        info!("decoy started on ports {:?}", server.local_ports());

        tokio::signal::ctrl_c().await.ok();
        info!("shutting down");
        server.stop().await;
    });
}
