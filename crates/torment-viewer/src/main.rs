use std::process::ExitCode;

use torment_engine::config::DriverConfig;
use torment_engine::driver::{FrameDriver, run};
use torment_engine::hal::native::{Native, NativeInstance};
use torment_engine::logging::{LoggingConfig, init_logging};
use torment_engine::window::{WindowConfig, WinitWindow};

fn main() -> ExitCode {
    init_logging(LoggingConfig::default());

    match start() {
        Ok(frames) => {
            log::info!("exiting after {frames} frames");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("torment: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn start() -> anyhow::Result<u64> {
    let mut window = WinitWindow::startup(WindowConfig::default())?;
    let mut driver = FrameDriver::<Native>::new(NativeInstance::default(), DriverConfig::default());

    run(&mut window, &mut driver)
}
