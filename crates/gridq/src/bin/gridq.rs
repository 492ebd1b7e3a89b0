use clap::{CommandFactory, FromArgMatches};
use tokio_util::sync::CancellationToken;

use gridq::commands::{WatchOptions, dispatch_once, watch};
use gridq::common::cli::{DispatchOpts, RootOptions, SubCommand, WatchOpts};
use gridq::common::setup::setup_logging;
use gridq::config::{DriverConfig, load_config};
use gridq::output::{Outputs, PrintingCoordinator};
use gridq::snapshot::FileSnapshotReader;

// Commands

fn command_dispatch(
    config: DriverConfig,
    output_mode: Outputs,
    opts: DispatchOpts,
) -> anyhow::Result<()> {
    let mut reader = FileSnapshotReader::new(opts.snapshot, config.scheduler).with_now(opts.now);
    let mut coordinator = PrintingCoordinator::new(output_mode, std::io::stdout().lock());
    dispatch_once(&mut reader, &mut coordinator, opts.summary)?;
    coordinator.finish()?;
    Ok(())
}

async fn command_watch(
    config: DriverConfig,
    output_mode: Outputs,
    opts: WatchOpts,
) -> anyhow::Result<()> {
    let options = WatchOptions {
        interval: opts
            .interval
            .map(|interval| interval.unpack())
            .unwrap_or_else(|| config.interval()),
        minimum_delay: config.minimum_delay(),
        max_epochs: opts.max_epochs,
    };
    let mut reader = FileSnapshotReader::new(opts.snapshot, config.scheduler);
    let mut coordinator = PrintingCoordinator::new(output_mode, std::io::stdout());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, finishing");
            on_signal.cancel();
        }
    });

    let epochs = watch(&mut reader, &mut coordinator, options, cancel).await;
    log::info!("{epochs} epochs scheduled");
    coordinator.finish()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> gridq::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let output_mode = top_opts.common.output_mode;
    let result = match load_config(top_opts.common.config.as_deref()) {
        Ok(config) => match top_opts.subcmd {
            SubCommand::Dispatch(opts) => command_dispatch(config, output_mode, opts),
            SubCommand::Watch(opts) => command_watch(config, output_mode, opts).await,
        },
        Err(error) => Err(error.into()),
    };

    if let Err(e) = result {
        eprintln!("{e:?}");
        std::process::exit(1);
    }

    Ok(())
}
