use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use xembed_tray::Manager;

mod daemon;
mod opts;
mod proxy;

fn main() {
    let opts = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("xembed_sni_bridge"), log_level_filter)
            .filter(Some("xembed_tray"), log_level_filter)
            .filter(Some("notifier_item"), log_level_filter)
            .init();
    }

    if let Err(err) = run(opts) {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt) -> Result<()> {
    let cancel = CancellationToken::new();
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], {
        let cancel = cancel.clone();
        move |_| {
            log::info!("Shutting down...");
            cancel.cancel();
        }
    });

    let (manager, events) = Manager::create(&opts.manager).context("Failed to become the system tray")?;
    let manager_thread = std::thread::Builder::new()
        .name("tray-manager".to_string())
        .spawn({
            let cancel = cancel.clone();
            move || manager.run(cancel)
        })
        .context("Failed to start the tray manager thread")?;

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("Failed to initialize tokio runtime")?;
    rt.block_on(daemon::run(opts.bridge, events, cancel.clone()));
    // stop the manager too if the dispatch loop ended first
    cancel.cancel();

    match manager_thread.join() {
        Ok(result) => result.context("Tray manager failed"),
        Err(_) => anyhow::bail!("Tray manager thread panicked"),
    }
}
