//! Frame driver.
//!
//! [`FrameDriver`] owns the session state machine, [`GpuContext`] owns the GPU
//! objects, and [`run`] is the main loop tying both to a platform window.

mod context;
mod state;

pub use context::{FrameOutcome, GpuContext};
pub use state::{DriverState, FrameDriver};

use anyhow::{Context, Result};

use crate::hal::Api;
use crate::window::{PlatformWindow, PumpStatus};

/// Runs the frame loop until the window asks to quit.
///
/// Initializes the driver against `window`, shows the window, then pumps
/// messages and renders once per iteration. Returns the number of frames
/// rendered. Any setup or GPU failure ends the loop with an error.
pub fn run<A, W>(window: &mut W, driver: &mut FrameDriver<A>) -> Result<u64>
where
    A: Api,
    W: PlatformWindow<Handle = A::Window>,
{
    let (width, height) = window.inner_size();
    driver
        .initialize(window.handle(), width, height)
        .context("GPU setup failed")?;
    window.show();

    while window.pump_messages() == PumpStatus::Continue {
        driver.render().context("frame failed")?;
    }

    driver.shutdown().context("GPU shutdown failed")?;
    Ok(driver.frames_rendered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CLEAR_COLOR, DriverConfig};
    use crate::device::SetupError;
    use crate::hal::null::{Command, Execution, Null, NullConfig, NullInstance, NullProbe};
    use crate::hal::{CommandList, ResourceState, Surface};
    use crate::window::HeadlessWindow;

    fn driver(config: NullConfig) -> (FrameDriver<Null>, NullProbe) {
        let instance = NullInstance::new(config);
        let probe = instance.probe();
        (FrameDriver::new(instance, DriverConfig::default()), probe)
    }

    fn ready(config: NullConfig) -> (FrameDriver<Null>, NullProbe) {
        let (mut driver, probe) = driver(config);
        let window = HeadlessWindow::new(960, 540);
        driver.initialize(&window, 960, 540).unwrap();
        (driver, probe)
    }

    fn next_value(driver: &FrameDriver<Null>) -> u64 {
        driver.context().unwrap().fence().next_value()
    }

    #[test]
    fn initialize_reaches_ready() {
        let (driver, probe) = ready(NullConfig::default());

        assert_eq!(driver.state(), DriverState::Ready);
        let context = driver.context().unwrap();
        assert_eq!(context.surface().buffer_count(), 2);
        assert!(driver.frame_index().unwrap().get() < 2);
        assert_eq!(next_value(&driver), 1);
        assert_eq!(probe.events_created(), 1);
    }

    #[test]
    fn one_frame_clears_presents_and_waits() {
        let (mut driver, probe) = ready(NullConfig::default());
        let image = driver.frame_index().unwrap().get();

        driver.render().unwrap();

        assert_eq!(next_value(&driver), 2);
        assert_eq!(probe.fence_completed(), Some(1));
        assert_eq!(probe.image_contents(image), Some(CLEAR_COLOR.to_array()));
        assert_eq!(probe.image_state(image), ResourceState::Present);
        assert_eq!(probe.presents(), 1);
        assert_eq!(
            probe.executed(),
            vec![
                Command::Barrier {
                    image,
                    before: ResourceState::Present,
                    after: ResourceState::RenderTarget,
                },
                Command::Clear {
                    image,
                    color: [0.0, 0.2, 0.4, 1.0],
                },
                Command::Barrier {
                    image,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                },
            ]
        );
        assert_eq!(driver.frame_index().unwrap().get(), probe.current_image());
        assert!(!driver.context().unwrap().recorder().list().is_recording());
    }

    #[test]
    fn second_frame_reuses_the_allocator() {
        let (mut driver, probe) = ready(NullConfig::default());

        driver.render().unwrap();
        driver.render().unwrap();

        assert_eq!(next_value(&driver), 3);
        assert_eq!(probe.fence_completed(), Some(2));
        assert_eq!(probe.image_contents(0), Some(CLEAR_COLOR.to_array()));
        assert_eq!(probe.image_contents(1), Some(CLEAR_COLOR.to_array()));
        assert_eq!(driver.frames_rendered(), 2);
    }

    #[test]
    fn frame_index_tracks_the_backend() {
        let config = NullConfig {
            initial_image_index: 1,
            ..NullConfig::default()
        };
        let (mut driver, probe) = ready(config);
        assert_eq!(driver.frame_index().unwrap().get(), 1);

        for frame in 1..=7u64 {
            driver.render().unwrap();

            let index = driver.frame_index().unwrap().get();
            assert!(index < 2);
            assert_eq!(index, probe.current_image());
            assert_eq!(next_value(&driver), frame + 1);
            assert!(probe.fence_completed().unwrap() >= frame);
        }
    }

    #[test]
    fn single_buffered_surface_still_renders() {
        let instance = NullInstance::default();
        let probe = instance.probe();
        let config = DriverConfig {
            buffer_count: 1,
            ..DriverConfig::default()
        };
        let mut driver = FrameDriver::<Null>::new(instance, config);
        driver
            .initialize(&HeadlessWindow::new(64, 64), 64, 64)
            .unwrap();

        driver.render().unwrap();
        driver.render().unwrap();

        assert_eq!(driver.frame_index().unwrap().get(), 0);
        assert_eq!(probe.presents(), 2);
    }

    #[test]
    fn skipped_frame_submits_nothing() {
        let (mut driver, probe) = ready(NullConfig::default());
        driver.render().unwrap();
        let index = driver.frame_index().unwrap();
        probe.skip_acquires(2);

        assert_eq!(driver.render().unwrap(), FrameOutcome::Skipped);
        assert_eq!(driver.render().unwrap(), FrameOutcome::Skipped);

        assert_eq!(driver.state(), DriverState::Ready);
        assert_eq!(driver.frames_rendered(), 1);
        assert_eq!(driver.frame_index(), Some(index));
        assert_eq!(next_value(&driver), 2);
        assert_eq!(probe.presents(), 1);
        assert_eq!(probe.executed().len(), 3);
        assert_eq!(probe.pending_ops(), 0);

        assert_eq!(driver.render().unwrap(), FrameOutcome::Presented);
        assert_eq!(next_value(&driver), 3);
        assert_eq!(probe.presents(), 2);

        driver.shutdown().unwrap();
        assert_eq!(probe.fence_completed(), Some(3));
    }

    #[test]
    fn run_keeps_going_through_skipped_frames() {
        let (mut driver, probe) = driver(NullConfig::default());
        probe.skip_acquires(3);
        let mut window = HeadlessWindow::new(960, 540).with_frame_limit(5);

        let frames = run(&mut window, &mut driver).unwrap();

        assert_eq!(frames, 2);
        assert_eq!(probe.skipped_acquires(), 3);
        assert_eq!(probe.presents(), 2);
        assert_eq!(driver.state(), DriverState::Terminated);
    }

    #[test]
    fn every_wait_blocks_when_the_gpu_lags() {
        let (mut driver, probe) = ready(NullConfig::default());

        driver.render().unwrap();
        driver.render().unwrap();

        assert_eq!(probe.blocking_waits(), 2);
        assert_eq!(probe.pending_ops(), 0);
    }

    #[test]
    fn shutdown_drains_and_releases_in_reverse_order() {
        let (mut driver, probe) = ready(NullConfig::default());
        driver.render().unwrap();

        driver.shutdown().unwrap();

        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(probe.fence_completed(), Some(2));
        assert_eq!(
            probe.released(),
            vec![
                "event",
                "fence",
                "command list",
                "command allocator",
                "descriptor heap",
                "surface",
                "queue",
                "device",
            ]
        );
    }

    #[test]
    fn shutdown_on_an_idle_gpu_does_not_block() {
        let (mut driver, probe) = ready(NullConfig {
            execution: Execution::Immediate,
            ..NullConfig::default()
        });
        driver.render().unwrap();
        assert_eq!(probe.fence_completed(), Some(next_value(&driver) - 1));

        driver.shutdown().unwrap();

        assert_eq!(probe.blocking_waits(), 0);
        assert_eq!(probe.fence_completed(), Some(2));
    }

    #[test]
    fn wait_event_is_released_exactly_once() {
        let (mut driver, probe) = ready(NullConfig::default());
        driver.render().unwrap();
        driver.shutdown().unwrap();
        assert_eq!(probe.events_released(), 1);

        drop(driver);
        assert_eq!(probe.events_created(), 1);
        assert_eq!(probe.events_released(), 1);
    }

    #[test]
    fn dropping_a_live_driver_still_drains() {
        let (mut driver, probe) = ready(NullConfig::default());
        driver.render().unwrap();

        drop(driver);

        assert_eq!(probe.fence_completed(), Some(2));
        assert_eq!(probe.events_released(), 1);
    }

    #[test]
    fn device_failure_aborts_setup() {
        let (mut driver, _probe) = driver(NullConfig {
            fail_device_creation: true,
            ..NullConfig::default()
        });

        let err = driver
            .initialize(&HeadlessWindow::new(960, 540), 960, 540)
            .unwrap_err();

        assert!(matches!(err, SetupError::Device(_)));
        assert_eq!(driver.state(), DriverState::Uninitialized);
    }

    #[test]
    fn zero_sized_window_aborts_setup() {
        let (mut driver, _probe) = driver(NullConfig::default());

        let err = driver
            .initialize(&HeadlessWindow::new(0, 0), 0, 0)
            .unwrap_err();

        assert!(matches!(err, SetupError::InvalidSurfaceSize { .. }));
    }

    #[test]
    #[should_panic(expected = "render() called while the driver is Uninitialized")]
    fn render_before_initialize_panics() {
        let (mut driver, _probe) = driver(NullConfig::default());
        let _ = driver.render();
    }

    #[test]
    #[should_panic(expected = "render() called while the driver is Terminated")]
    fn render_after_shutdown_panics() {
        let (mut driver, _probe) = ready(NullConfig::default());
        driver.shutdown().unwrap();
        let _ = driver.render();
    }

    #[test]
    #[should_panic(expected = "initialize() called while the driver is Ready")]
    fn initialize_twice_panics() {
        let (mut driver, _probe) = ready(NullConfig::default());
        let _ = driver.initialize(&HeadlessWindow::new(960, 540), 960, 540);
    }

    #[test]
    fn run_renders_until_the_window_quits() {
        let (mut driver, probe) = driver(NullConfig::default());
        let mut window = HeadlessWindow::new(960, 540).with_frame_limit(5);

        let frames = run(&mut window, &mut driver).unwrap();

        assert_eq!(frames, 5);
        assert!(window.is_visible());
        assert_eq!(probe.presents(), 5);
        assert_eq!(probe.fence_completed(), Some(6));
        assert_eq!(driver.state(), DriverState::Terminated);
    }

    #[test]
    fn run_reports_setup_failure() {
        let (mut driver, _probe) = driver(NullConfig {
            fail_device_creation: true,
            ..NullConfig::default()
        });
        let mut window = HeadlessWindow::new(960, 540).with_frame_limit(1);

        let err = run(&mut window, &mut driver).unwrap_err();

        assert!(err.downcast_ref::<SetupError>().is_some());
        assert!(!window.is_visible());
    }
}
