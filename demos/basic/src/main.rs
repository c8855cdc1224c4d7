use std::{thread, time::Duration};

use log::{info, warn};

mod app;

use app::App;

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Refsync Basic Demo started");

    let mut app = match App::new() {
        Ok(app) => app,
        Err(err) => {
            warn!("Demo could not start: {}", err);
            return;
        }
    };
    while app.update() {
        thread::sleep(Duration::from_millis(16));
    }
    app.shutdown();
}
