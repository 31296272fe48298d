mod app_bootstrap;
mod app_runtime;
mod config;
mod config_persistence;
mod error;
mod integration;
mod media_source;
mod metadata;
mod protocol;
mod runtime;
mod status_reporter;

use app_runtime::AppRuntime;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The configured level is applied once the config is loaded.
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    AppRuntime::build()?.run()
}
