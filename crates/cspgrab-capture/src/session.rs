//! The capture session state machine.
//!
//! ```text
//! Uninitialized ──initialize──► AwaitingSource ──source selected──► Ready
//!                                                                   │  ▲
//!                                                capture/wait_frame │  │ frame or per-frame error
//!                                                                   ▼  │
//!                                                                Capturing
//! any state ──shutdown / fatal error──► Shutdown ──initialize──► …
//! ```

use cspgrab_core::{CaptureConfig, CaptureError, Frame, SourceDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::bridge::TextureBridge;
use crate::channel::{MappingOpener, SharedChannel};
use crate::gpu::{DeviceFactory, GpuDevice};
use crate::reader::FrameReader;
use crate::registry::SourceRegistry;
use crate::wait::Poller;
use crate::{PlatformDeviceFactory, PlatformMappingOpener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    AwaitingSource,
    Ready,
    Capturing,
    Shutdown,
}

type TextureOf<F> = <<F as DeviceFactory>::Device as GpuDevice>::Texture;

/// A capture session over one source of the shared texture table.
///
/// The session exclusively owns the device, the mapping, and every texture;
/// dropping it releases them all.
pub struct CaptureSession<F = PlatformDeviceFactory, O = PlatformMappingOpener>
where
    F: DeviceFactory,
    O: MappingOpener,
{
    config: CaptureConfig,
    factory: F,
    opener: O,
    cancel: CancellationToken,
    state: SessionState,
    device: Option<F::Device>,
    channel: Option<SharedChannel>,
    selected: Option<SourceDescriptor>,
    bridge: TextureBridge<TextureOf<F>>,
    reader: FrameReader,
}

impl CaptureSession {
    /// Session on the platform backends (Direct3D 11 and named file
    /// mappings on Windows).
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_backends(config, PlatformDeviceFactory::default(), PlatformMappingOpener::default())
    }
}

impl<F, O> CaptureSession<F, O>
where
    F: DeviceFactory,
    O: MappingOpener,
{
    pub fn with_backends(config: CaptureConfig, factory: F, opener: O) -> Self {
        let bridge = TextureBridge::new(config.restage_on_change);
        let reader = FrameReader::from_config(&config);
        Self {
            config,
            factory,
            opener,
            cancel: CancellationToken::new(),
            state: SessionState::Uninitialized,
            device: None,
            channel: None,
            selected: None,
            bridge,
            reader,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// The source chosen at initialization, as it was when selected.
    pub fn selected(&self) -> Option<&SourceDescriptor> {
        self.selected.as_ref()
    }

    /// Token cancelling the session's waits. Clone it before blocking to
    /// cancel from another thread.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Live snapshot of every published source.
    pub fn sources(&self) -> Result<Vec<SourceDescriptor>, CaptureError> {
        let channel = self.channel.as_ref().ok_or(CaptureError::NotInitialized)?;
        SourceRegistry::from_config(&self.config).enumerate(channel)
    }

    /// Create the device, open the table, wait for a source, select it, and
    /// prepare its textures. On failure everything acquired is released.
    #[instrument(name = "initialize_capture", skip_all, err)]
    pub fn initialize(&mut self) -> Result<(), CaptureError> {
        if self.device.is_some() || self.channel.is_some() {
            return Err(CaptureError::AlreadyInitialized);
        }
        self.config.validate()?;

        match self.try_initialize() {
            Ok(()) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                self.release_all();
                self.state = SessionState::Uninitialized;
                Err(err)
            }
        }
    }

    fn try_initialize(&mut self) -> Result<(), CaptureError> {
        let device = self.device.insert(self.factory.create()?);

        let channel = SharedChannel::open(&self.opener, &self.config.mapping_name, self.config.alive_value)?;
        channel.heartbeat();
        let channel = self.channel.insert(channel);
        self.state = SessionState::AwaitingSource;

        let registry = SourceRegistry::from_config(&self.config);
        let poller = Poller::new("texture source", self.config.source_poll_interval())
            .with_timeout(self.config.source_timeout())
            .with_cancel(self.cancel.clone());
        registry.wait_for_any_source(channel, &poller)?;
        let selected = self.selected.insert(registry.select_first_valid(channel)?);

        self.bridge.resolve(device, selected.handle)?;
        self.bridge.ensure_staging(device)?;
        Ok(())
    }

    /// Read the selected source's current image.
    #[instrument(name = "grab_frame", level = "trace", skip_all, err)]
    pub fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        self.run_frame(false)
    }

    /// Request a fresh image and block until the producer acknowledges it.
    #[instrument(name = "wait_new_frame", level = "trace", skip_all, err)]
    pub fn wait_frame(&mut self) -> Result<Frame, CaptureError> {
        self.run_frame(true)
    }

    fn run_frame(&mut self, wait: bool) -> Result<Frame, CaptureError> {
        if self.state != SessionState::Ready {
            return Err(CaptureError::NotInitialized);
        }
        let (Some(device), Some(channel), Some(selected)) =
            (self.device.as_mut(), self.channel.as_ref(), self.selected.as_ref())
        else {
            return Err(CaptureError::NotInitialized);
        };

        self.state = SessionState::Capturing;
        let result = if wait {
            self.reader.wait_for_frame(channel, selected, &mut self.bridge, device, &self.cancel)
        } else {
            self.reader.read_frame(channel, selected, &mut self.bridge, device)
        };
        self.state = SessionState::Ready;

        if let Err(err) = &result {
            if err.is_fatal() {
                warn!("Fatal capture error, shutting session down: {}", err);
                self.shutdown();
            }
        }
        result
    }

    /// Release GPU resources, set the source idle, and close the table.
    /// Safe to call at any point, any number of times.
    pub fn shutdown(&mut self) {
        let had_resources = self.device.is_some() || self.channel.is_some();
        self.release_all();
        self.state = SessionState::Shutdown;
        if had_resources {
            info!("Capture session shut down");
        }
    }

    fn release_all(&mut self) {
        match self.device.as_mut() {
            Some(device) => self.bridge.release(device),
            None => self.bridge.discard(),
        }
        self.device = None;

        if let Some(mut channel) = self.channel.take() {
            if let Some(selected) = self.selected.as_ref() {
                if let Some(slot) = channel.table().ok().and_then(|t| t.slot(selected.index)) {
                    slot.set_needs_data(self.config.idle_code);
                }
            }
            channel.close();
        }
        self.selected = None;
    }
}

impl<F, O> Drop for CaptureSession<F, O>
where
    F: DeviceFactory,
    O: MappingOpener,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cspgrab_core::SourceFlags;

    use super::*;
    use crate::channel::{HeapMapping, SharedMapping};
    use crate::mock::MockFactory;

    struct NoMapping;

    impl MappingOpener for NoMapping {
        fn open(&self, name: &str) -> Result<Box<dyn SharedMapping>, CaptureError> {
            Err(CaptureError::MappingUnavailable { name: name.to_owned(), code: 2 })
        }
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            source_poll_interval_ms: 1,
            source_timeout_ms: Some(2_000),
            frame_timeout_ms: Some(2_000),
            ..CaptureConfig::default()
        }
    }

    fn producer_with(entries: &[(u32, SourceFlags)], width: u16, height: u16) -> HeapMapping {
        let producer = HeapMapping::new();
        let table = producer.table();
        for (i, (handle, flags)) in entries.iter().enumerate() {
            let slot = table.slot(i).unwrap();
            slot.set_handle(*handle);
            slot.set_flags(*flags);
            slot.set_size(width, height);
            slot.set_name(&format!("source-{}", i));
        }
        table.set_items_count(entries.len() as i32);
        producer
    }

    fn session(producer: &HeapMapping, factory: &MockFactory) -> CaptureSession<MockFactory, HeapMapping> {
        CaptureSession::with_backends(config(), factory.clone(), producer.clone())
    }

    #[test]
    fn initialize_selects_first_valid_and_prepares_textures() {
        let producer = producer_with(&[(0, SourceFlags::empty()), (0xABCD, SourceFlags::empty())], 64, 32);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0xABCD, 64, 32);

        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.selected().unwrap().index, 1);
        assert_eq!(producer.table().slot(1).unwrap().needs_data(), 3);
        assert_eq!(producer.table().alive_counter(), 60);
        let state = factory.state.borrow();
        assert_eq!(state.opened, vec![0xABCD]);
        assert_eq!(state.staging_created.len(), 1);
    }

    #[test]
    fn double_initialize_fails_fast() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x1, 8, 8);
        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        assert_eq!(session.initialize(), Err(CaptureError::AlreadyInitialized));
        assert_eq!(factory.state.borrow().devices_created, 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn frames_match_declared_size_and_keep_staging_cached() {
        let producer = producer_with(&[(0x10, SourceFlags::empty())], 1920, 1080);
        let factory = MockFactory::new();
        {
            let mut state = factory.state.borrow_mut();
            state.row_align = 256;
            state.publish(0x10, 1920, 1080);
        }
        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        for _ in 0..3 {
            let frame = session.capture_frame().unwrap();
            assert_eq!((frame.width, frame.height), (1920, 1080));
            assert_eq!(frame.data.len(), 1920 * 1080 * 4);
            assert_eq!(frame.row_pitch, 7680);
        }
        assert_eq!(factory.state.borrow().staging_created.len(), 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn capture_before_initialize_is_rejected() {
        let producer = HeapMapping::new();
        let factory = MockFactory::new();
        let mut session = session(&producer, &factory);
        assert_eq!(session.capture_frame(), Err(CaptureError::NotInitialized));
        assert_eq!(session.wait_frame(), Err(CaptureError::NotInitialized));
    }

    #[test]
    fn failed_device_creation_leaves_nothing_open() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().fail_device = true;
        let mut session = session(&producer, &factory);

        let err = session.initialize().unwrap_err();
        assert_eq!(err.status_code(), -1);
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.sources().is_err());
    }

    #[test]
    fn failed_mapping_releases_the_device() {
        let factory = MockFactory::new();
        let mut session = CaptureSession::with_backends(config(), factory.clone(), NoMapping);

        let err = session.initialize().unwrap_err();
        assert!(matches!(err, CaptureError::MappingUnavailable { .. }));
        let state = factory.state.borrow();
        assert_eq!(state.devices_created, 1);
        assert_eq!(state.devices_dropped, 1);
    }

    #[test]
    fn no_valid_source_tears_down_everything() {
        let producer = producer_with(&[(0, SourceFlags::empty()), (0x3, SourceFlags::UNAVAILABLE)], 8, 8);
        let factory = MockFactory::new();
        let mut session = session(&producer, &factory);

        assert_eq!(session.initialize(), Err(CaptureError::NoValidSource { count: 2 }));
        assert_eq!(factory.state.borrow().devices_dropped, 1);
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn staging_failure_releases_the_opened_shared_texture() {
        let producer = producer_with(&[(0x4, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        {
            let mut state = factory.state.borrow_mut();
            state.publish(0x4, 8, 8);
            state.fail_staging = true;
        }
        let mut session = session(&producer, &factory);

        let err = session.initialize().unwrap_err();
        assert_eq!(err.status_code(), -6);
        let state = factory.state.borrow();
        assert_eq!(state.released_shared, vec![0x4]);
        assert_eq!(state.devices_dropped, 1);
        // The source was asked for data before the failure; it is idle again.
        assert_eq!(producer.table().slot(0).unwrap().needs_data(), 0);
    }

    #[test]
    fn source_wait_times_out_when_nothing_is_published() {
        let producer = HeapMapping::new();
        let factory = MockFactory::new();
        let mut cfg = config();
        cfg.source_timeout_ms = Some(10);
        let mut session = CaptureSession::with_backends(cfg, factory.clone(), producer.clone());

        assert!(matches!(session.initialize(), Err(CaptureError::Timeout { .. })));
        assert_eq!(factory.state.borrow().devices_dropped, 1);
    }

    #[test]
    fn cancelled_token_aborts_source_wait() {
        let producer = HeapMapping::new();
        let factory = MockFactory::new();
        let mut cfg = config();
        cfg.source_timeout_ms = None;
        let mut session = CaptureSession::with_backends(cfg, factory, producer);
        session.cancel_token().cancel();

        assert!(matches!(session.initialize(), Err(CaptureError::Cancelled { .. })));
    }

    #[test]
    fn shutdown_is_idempotent_and_safe_when_never_initialized() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x1, 8, 8);

        let mut idle = session(&producer, &factory);
        idle.shutdown();
        idle.shutdown();
        assert_eq!(idle.state(), SessionState::Shutdown);

        let mut session = session(&producer, &factory);
        session.initialize().unwrap();
        session.shutdown();
        session.shutdown();
        drop(session);

        let state = factory.state.borrow();
        assert_eq!(state.released_shared, vec![0x1]);
        assert_eq!(state.staging_released, 1);
        assert_eq!(state.devices_dropped, 1);
        assert_eq!(producer.table().slot(0).unwrap().needs_data(), 0);
    }

    #[test]
    fn session_can_be_reinitialized_after_shutdown() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x1, 8, 8);
        let mut session = session(&producer, &factory);

        session.initialize().unwrap();
        session.shutdown();
        assert_eq!(session.capture_frame(), Err(CaptureError::NotInitialized));
        session.initialize().unwrap();
        assert!(session.capture_frame().is_ok());
        assert_eq!(factory.state.borrow().devices_created, 2);
    }

    #[test]
    fn map_failure_keeps_session_ready() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x1, 8, 8);
        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        factory.state.borrow_mut().fail_map = true;
        assert!(matches!(session.capture_frame(), Err(CaptureError::MapFailed { .. })));
        assert_eq!(session.state(), SessionState::Ready);

        factory.state.borrow_mut().fail_map = false;
        assert!(session.capture_frame().is_ok());
    }

    #[test]
    fn copy_failure_keeps_session_ready() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x1, 8, 8);
        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        factory.state.borrow_mut().fail_copy = true;
        let err = session.capture_frame().unwrap_err();
        assert!(matches!(err, CaptureError::CopyFailed { .. }));
        assert!(!err.is_fatal());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(factory.state.borrow().maps, 0);

        factory.state.borrow_mut().fail_copy = false;
        let frame = session.capture_frame().unwrap();
        assert_eq!(frame.data.len(), 8 * 8 * 4);
        assert_eq!(factory.state.borrow().copies, 1);
    }

    #[test]
    fn unopenable_shared_texture_aborts_initialize() {
        let producer = producer_with(&[(0x2, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        {
            let mut state = factory.state.borrow_mut();
            state.publish(0x2, 8, 8);
            state.fail_open = true;
        }
        let mut session = session(&producer, &factory);

        let err = session.initialize().unwrap_err();
        assert_eq!(err.status_code(), -5);
        assert_eq!(session.state(), SessionState::Uninitialized);
        let state = factory.state.borrow();
        assert!(state.opened.is_empty());
        assert!(state.staging_created.is_empty());
        assert_eq!(state.devices_dropped, 1);
        assert_eq!(producer.table().slot(0).unwrap().needs_data(), 0);
    }

    #[test]
    fn rotation_to_unopenable_handle_is_fatal() {
        let producer = producer_with(&[(0x1, SourceFlags::empty())], 8, 8);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x1, 8, 8);
        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        producer.table().slot(0).unwrap().set_handle(0);
        let err = session.capture_frame().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Shutdown);
        assert_eq!(factory.state.borrow().devices_dropped, 1);
    }

    #[test]
    fn wait_frame_returns_after_acknowledgment() {
        let producer = producer_with(&[(0x8, SourceFlags::HDR)], 16, 16);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x8, 16, 16);
        let mut session = session(&producer, &factory);
        session.initialize().unwrap();

        let ack = {
            let producer = producer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                producer.table().slot(0).unwrap().set_needs_data(0);
            })
        };
        let frame = session.wait_frame().unwrap();
        ack.join().unwrap();
        assert!(frame.is_hdr());
        assert_eq!(frame.data.len(), 16 * 16 * 4);
    }

    #[test]
    fn frame_wait_timeout_is_recoverable() {
        let producer = producer_with(&[(0x8, SourceFlags::empty())], 16, 16);
        let factory = MockFactory::new();
        factory.state.borrow_mut().publish(0x8, 16, 16);
        let mut cfg = config();
        cfg.frame_timeout_ms = Some(5);
        let mut session = CaptureSession::with_backends(cfg, factory, producer);
        session.initialize().unwrap();

        assert!(matches!(session.wait_frame(), Err(CaptureError::Timeout { .. })));
        assert_eq!(session.state(), SessionState::Ready);
    }
}
