pub mod app;
pub mod renderer;

use clap::Parser;
use color_eyre::Result;
use app::{App, Cli};
use renderer::config::RenderConfig;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::from(Cli::parse());
    if config.list_gpus {
        return app::list_gpus(&config);
    }

    App::new(config).run()
}
