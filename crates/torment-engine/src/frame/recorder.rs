use crate::config::Color;
use crate::device::{FrameError, FrameStage, SetupError};
use crate::hal::{Api, CommandAllocator, CommandList, Device, HalError, ResourceState};
use crate::surface::RenderTarget;

/// Records one clear-and-present frame into `list`.
///
/// Sequence: reset allocator, reset list, barrier present -> render target,
/// clear, barrier render target -> present, close. The list is closed on
/// return and nothing has been submitted.
///
/// The caller guarantees the GPU no longer executes anything recorded from
/// `allocator`.
pub fn record_frame<A: Api>(
    allocator: &mut A::CommandAllocator,
    list: &mut A::CommandList,
    target: RenderTarget<'_, A>,
    clear: Color,
) -> Result<(), FrameError> {
    record(allocator, list, target, clear).map_err(FrameError::at(FrameStage::Recording))
}

fn record<A: Api>(
    allocator: &mut A::CommandAllocator,
    list: &mut A::CommandList,
    target: RenderTarget<'_, A>,
    clear: Color,
) -> Result<(), HalError> {
    allocator.reset()?;
    list.reset(allocator)?;

    list.resource_barrier(
        target.image,
        ResourceState::Present,
        ResourceState::RenderTarget,
    )?;
    list.clear_render_target_view(target.rtv, clear.to_array())?;
    list.resource_barrier(
        target.image,
        ResourceState::RenderTarget,
        ResourceState::Present,
    )?;

    list.close()
}

/// The single command allocator/list pair.
///
/// Capacity is one frame: the fence wait after each submission is what makes
/// the pair reusable.
pub struct FrameRecorder<A: Api> {
    list: A::CommandList,
    allocator: A::CommandAllocator,
}

impl<A: Api> FrameRecorder<A> {
    pub fn new(device: &A::Device) -> Result<Self, SetupError> {
        let allocator = device
            .create_command_allocator()
            .map_err(SetupError::CommandAllocator)?;
        let mut list = device
            .create_command_list(&allocator)
            .map_err(SetupError::CommandList)?;

        // Lists start out recording; the frame loop expects a closed one.
        list.close().map_err(SetupError::CommandList)?;

        Ok(Self { list, allocator })
    }

    pub fn record(&mut self, target: RenderTarget<'_, A>, clear: Color) -> Result<(), FrameError> {
        record_frame::<A>(&mut self.allocator, &mut self.list, target, clear)
    }

    pub fn list(&self) -> &A::CommandList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut A::CommandList {
        &mut self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CLEAR_COLOR;
    use crate::device::{create_device, create_queue};
    use crate::hal::SurfaceFormat;
    use crate::hal::null::{Command, Null, NullConfig, NullDevice, NullInstance, NullSurface};
    use crate::surface::{RtvTable, create_surface};
    use crate::window::HeadlessWindow;

    struct Setup {
        device: NullDevice,
        table: RtvTable<Null>,
        _surface: NullSurface,
    }

    fn setup() -> Setup {
        let instance = NullInstance::new(NullConfig::default());
        let device = create_device::<Null>(&instance, false).unwrap();
        let queue = create_queue::<Null>(&device).unwrap();
        let window = HeadlessWindow::new(64, 64);
        let surface = create_surface::<Null>(
            &device,
            &queue,
            &window,
            64,
            64,
            2,
            SurfaceFormat::Rgba8Unorm,
        )
        .unwrap();
        let table = RtvTable::create(&device, &surface).unwrap();
        Setup {
            device,
            table,
            _surface: surface,
        }
    }

    #[test]
    fn new_list_starts_closed() {
        let setup = setup();
        let recorder = FrameRecorder::<Null>::new(&setup.device).unwrap();
        assert!(!recorder.list().is_recording());
    }

    #[test]
    fn records_barrier_clear_barrier_and_closes() {
        let setup = setup();
        let mut recorder = FrameRecorder::<Null>::new(&setup.device).unwrap();
        let index = setup.table.frame_index(1).unwrap();

        recorder.record(setup.table.target(index), CLEAR_COLOR).unwrap();

        assert!(!recorder.list().is_recording());
        assert_eq!(
            recorder.list().commands(),
            &[
                Command::Barrier {
                    image: 1,
                    before: ResourceState::Present,
                    after: ResourceState::RenderTarget,
                },
                Command::Clear {
                    image: 1,
                    color: [0.0, 0.2, 0.4, 1.0],
                },
                Command::Barrier {
                    image: 1,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                },
            ]
        );
    }

    #[test]
    fn recording_twice_replaces_the_previous_frame() {
        let setup = setup();
        let mut recorder = FrameRecorder::<Null>::new(&setup.device).unwrap();
        let index = setup.table.frame_index(0).unwrap();

        recorder.record(setup.table.target(index), CLEAR_COLOR).unwrap();
        recorder
            .record(setup.table.target(index), Color::rgba(1.0, 0.0, 0.0, 1.0))
            .unwrap();

        assert_eq!(recorder.list().commands().len(), 3);
        assert!(recorder.list().commands().contains(&Command::Clear {
            image: 0,
            color: [1.0, 0.0, 0.0, 1.0],
        }));
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn closing_twice_is_a_contract_violation() {
        let setup = setup();
        let mut recorder = FrameRecorder::<Null>::new(&setup.device).unwrap();
        let index = setup.table.frame_index(0).unwrap();

        recorder.record(setup.table.target(index), CLEAR_COLOR).unwrap();
        let _ = recorder.list_mut().close();
    }
}
