use std::{net::SocketAddr, sync::Arc};

use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use controller::*;

fn main() {
    use clap::{Arg, ArgAction, Command, crate_authors, crate_description, crate_name, crate_version};
    use std::process;
    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([Command::new("run").about("run controllers").args([
            Arg::new("introspection_address")
                .long("introspection-bind-address")
                .help("address to bind for the HTTP introspection server")
                .default_value("[::]:8089"),
            Arg::new("console_url")
                .long("console-url")
                .env("CONSOLE_URL")
                .help("pipeline run viewer URL template linked from commit statuses")
                .long_help(concat!(
                    "Pipeline run viewer URL template linked from commit statuses.\n",
                    "`{namespace}` and `{pipelinerun}` are replaced for every report."
                ))
                .default_value(status::DEFAULT_CONSOLE_URL),
            Arg::new("namespace")
                .long("namespace")
                .env("WATCH_NAMESPACE")
                .help("only watch the named namespace; watches all namespaces if unset"),
            Arg::new("controllers")
                .action(ArgAction::Append)
                .default_values(["buildpipeline"]),
        ])]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("run", m)) => match Args::try_from(m) {
            Ok(args) => startup(args),
            Err(e) => Err(Error::from(e)),
        },
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

struct Args {
    console_url: String,
    controllers: Vec<String>,
    introspection_address: SocketAddr,
    namespace: Option<String>,
}

impl TryFrom<&clap::ArgMatches> for Args {
    type Error = std::net::AddrParseError;

    fn try_from(m: &clap::ArgMatches) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            console_url: m.get_one::<String>("console_url").unwrap().clone(),
            introspection_address: m
                .get_one::<String>("introspection_address")
                .unwrap()
                .parse()?,
            namespace: m
                .get_one::<String>("namespace")
                .filter(|ns| !ns.is_empty())
                .cloned(),
            controllers: m
                .get_many::<String>("controllers")
                .unwrap()
                .map(Clone::clone)
                .collect(),
        })
    }
}

impl Args {
    fn config(&self) -> config::Config {
        config::Config {
            console_url: self.console_url.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

fn startup(args: Args) -> controller::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::{runtime, signal};
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stdout().is_terminal() {
            Some(tracing_subscriber::fmt::layer())
        } else {
            None
        })
        .with(if std::io::stdout().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json())
        });
    tracing::subscriber::set_global_default(collector)?;
    let prom = PrometheusBuilder::new().with_http_listener(args.introspection_address);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let token = CancellationToken::new();
    rt.handle().spawn(async move {
        if let Err(e) = prom.install() {
            error!("error setting up prometheus endpoint: {e}");
        }
    });
    let ctlstop = token.clone();
    rt.handle().spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("error reading SIGTERM: {err}");
        }
        token.cancel();
    });
    rt.block_on(run(args, ctlstop))
}

async fn run(args: Args, token: CancellationToken) -> controller::Result<()> {
    use tokio::task;

    let config = kube::Config::infer().await?;
    let client = kube::client::ClientBuilder::try_from(config)?.build();

    let cfg = args.config();
    info!(console_url = %cfg.console_url, namespace = ?cfg.namespace, "configured");
    let ctx = Arc::new(Context::new(client, cfg)?);
    info!("setup done, starting controllers");
    let mut ctrls = task::JoinSet::new();
    for name in &args.controllers {
        let fut = match name.to_lowercase().as_str() {
            "buildpipeline" | "build" => buildpipeline::controller(token.clone(), ctx.clone())?,
            other => {
                warn!(name = other, "unrecognized controller name, skipping");
                continue;
            }
        };
        ctrls.spawn(fut);
    }
    while let Some(res) = ctrls.join_next().await {
        match res {
            Err(e) => error!("error starting controller: {e}"),
            Ok(res) => {
                if let Err(e) = res {
                    error!("error from controller: {e}");
                    token.cancel();
                }
            }
        };
    }
    Ok(())
}
