use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::Rgba;
use renderer::{
    Bitmap, BackgroundImageLoader, Canvas, ImageRequest, InlineImageLoader, LoadError, LoadReply,
    ParticleSimulator, PresentationSurface, RenderLoopEngine, SoftwareSurface,
};
use scheduler::{Clock, ManualClock};
use settings::{Color, ParticleSettings, Settings, SettingsSource, SettingsStore};
use tempfile::TempDir;

#[derive(Debug, Default)]
struct RecordingSimulator {
    bounds: Option<(i32, i32, i32, i32)>,
    running: bool,
    draws: usize,
    advances: usize,
    configured: usize,
    panic_on_draw: bool,
}

impl ParticleSimulator for RecordingSimulator {
    fn set_bounds(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        self.bounds = Some((left, top, right, bottom));
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn draw(&mut self, _canvas: &mut Canvas) {
        if self.panic_on_draw {
            panic!("simulator blew up");
        }
        self.draws += 1;
    }

    fn advance(&mut self) {
        self.advances += 1;
    }

    fn configure(&mut self, _params: &ParticleSettings) {
        self.configured += 1;
    }
}

/// Software surface that can refuse to hand out its canvas.
#[derive(Debug, Default)]
struct ToggleSurface {
    inner: SoftwareSurface,
    unavailable: bool,
    acquired: usize,
    released: usize,
}

impl PresentationSurface for ToggleSurface {
    fn acquire(&mut self) -> Option<Canvas> {
        if self.unavailable {
            return None;
        }
        let canvas = self.inner.acquire()?;
        self.acquired += 1;
        Some(canvas)
    }

    fn release(&mut self, canvas: Canvas) {
        self.released += 1;
        self.inner.release(canvas);
    }
}

#[derive(Clone, Default)]
struct RecordingLoader {
    requests: Arc<Mutex<Vec<(ImageRequest, LoadReply)>>>,
}

impl RecordingLoader {
    fn requests(&self) -> Vec<ImageRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    fn take_reply(&self) -> LoadReply {
        self.requests.lock().unwrap().remove(0).1
    }
}

impl BackgroundImageLoader for RecordingLoader {
    fn load(&self, request: ImageRequest, reply: LoadReply) {
        self.requests.lock().unwrap().push((request, reply));
    }
}

type TestEngine = RenderLoopEngine<RecordingSimulator, ToggleSurface, ManualClock>;

struct Harness {
    store: SettingsStore,
    loader: RecordingLoader,
    clock: ManualClock,
    engine: TestEngine,
}

impl Harness {
    fn new(settings: Settings, width: u32, height: u32) -> Self {
        let store = SettingsStore::new(settings);
        let loader = RecordingLoader::default();
        let clock = ManualClock::new();
        let surface = ToggleSurface {
            inner: SoftwareSurface::new(width, height),
            ..ToggleSurface::default()
        };
        let engine = RenderLoopEngine::new(
            Arc::new(store.clone()),
            Box::new(loader.clone()),
            RecordingSimulator::default(),
            surface,
            clock.clone(),
        );
        Self {
            store,
            loader,
            clock,
            engine,
        }
    }

    fn created(width: u32, height: u32) -> Self {
        let mut harness = Self::new(Settings::default(), width, height);
        harness.engine.on_create();
        harness.engine.on_surface_changed(width, height);
        harness
    }
}

fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Bitmap {
    Bitmap::from_pixel(width, height, Rgba(rgba))
}

#[test]
fn settings_changes_while_invisible_never_draw() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(false);

    for step in 0..5u8 {
        let mut settings = harness.store.snapshot();
        settings.background_color = Color::from_rgb(step, step, step);
        settings.frame_delay = Duration::from_millis(10 + u64::from(step));
        settings.particles.density = 10 + u32::from(step);
        harness.store.apply(settings);
        harness.clock.advance(Duration::from_millis(50));
        harness.engine.run_pending();
    }

    assert_eq!(harness.engine.simulator().draws, 0);
    assert_eq!(harness.engine.pending_frames(), 0);
    assert_eq!(harness.engine.background_color(), Color::from_rgb(4, 4, 4));

    harness.engine.on_visibility_changed(true);
    assert_eq!(harness.engine.run_pending(), 1);
    assert_eq!(harness.engine.simulator().draws, 1);
}

#[test]
fn one_frame_pending_after_each_draw() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(true);

    for _ in 0..4 {
        harness.engine.draw();
        assert_eq!(harness.engine.pending_frames(), 1);
    }
}

#[test]
fn empty_uri_clears_without_loading() {
    let mut harness = Harness::created(8, 8);
    harness.engine.handle_background("file:///bg.png");
    harness.loader.take_reply().deliver(Ok(solid(8, 8, [1, 2, 3, 255])));
    harness.engine.run_pending();
    assert!(harness.engine.background().is_some());

    harness.engine.handle_background("");

    assert!(harness.engine.background().is_none());
    assert!(harness.loader.requests().is_empty());
    assert!(!harness.engine.is_loading_background());
}

#[test]
fn zero_dimension_defers_load() {
    let mut settings = Settings::default();
    settings.background_uri = "file:///bg.png".into();
    let mut harness = Harness::new(settings, 8, 8);
    harness.engine.on_create();
    assert!(harness.loader.requests().is_empty());

    harness.engine.on_surface_changed(0, 300);
    harness.engine.handle_background("file:///other.png");
    assert!(harness.loader.requests().is_empty());

    harness.engine.on_surface_changed(8, 8);
    assert_eq!(harness.loader.requests().len(), 1);
}

#[test]
fn load_outcome_sets_or_clears_background() {
    let mut harness = Harness::created(8, 8);

    harness.engine.handle_background("file:///bg.png");
    harness
        .loader
        .take_reply()
        .deliver(Ok(solid(8, 8, [10, 20, 30, 255])));
    harness.engine.run_pending();
    let background = harness.engine.background().expect("loaded background");
    assert_eq!(background.get_pixel(3, 3).0, [10, 20, 30, 255]);

    harness.engine.handle_background("file:///missing.png");
    harness
        .loader
        .take_reply()
        .deliver(Err(LoadError::UnsupportedUri("file:///missing.png".into())));
    harness.engine.run_pending();
    assert!(harness.engine.background().is_none());
}

#[test]
fn surface_change_loads_configured_background_and_blits_unscaled() {
    let mut settings = Settings::default();
    settings.background_uri = "file:///bg.png".into();
    let mut harness = Harness::new(settings, 100, 200);
    harness.engine.on_create();

    harness.engine.on_surface_changed(100, 200);

    let requests = harness.loader.requests();
    assert_eq!(
        requests,
        vec![ImageRequest {
            uri: "file:///bg.png".into(),
            width: 100,
            height: 200,
        }]
    );
    assert_eq!(harness.engine.simulator().bounds, Some((0, 0, 100, 200)));

    harness
        .loader
        .take_reply()
        .deliver(Ok(solid(10, 10, [255, 0, 0, 255])));
    harness.engine.run_pending();
    harness.engine.draw();

    let frame = harness.engine.surface().inner.snapshot().expect("frame");
    assert_eq!(frame.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(frame.get_pixel(9, 9).0, [255, 0, 0, 255]);
    assert_eq!(frame.get_pixel(10, 10).0, [0, 0, 0, 0]);
    assert_eq!(frame.get_pixel(50, 150).0, [0, 0, 0, 0]);
}

#[test]
fn queued_uri_emission_does_not_repeat_surface_load() {
    let mut harness = Harness::new(Settings::default(), 100, 200);
    harness.engine.on_create();

    let mut settings = harness.store.snapshot();
    settings.background_uri = "file:///bg.png".into();
    harness.store.apply(settings);
    harness.engine.on_surface_changed(100, 200);
    harness.engine.run_pending();

    assert_eq!(
        harness.loader.requests(),
        vec![ImageRequest {
            uri: "file:///bg.png".into(),
            width: 100,
            height: 200,
        }]
    );
    assert!(harness.engine.is_loading_background());

    harness
        .loader
        .take_reply()
        .deliver(Ok(solid(100, 200, [7, 7, 7, 255])));
    harness.engine.run_pending();
    assert!(harness.engine.background().is_some());
}

#[test]
fn uri_emission_after_resize_or_change_still_loads() {
    let mut settings = Settings::default();
    settings.background_uri = "file:///a.png".into();
    let mut harness = Harness::new(settings, 100, 200);
    harness.engine.on_create();
    harness.engine.on_surface_changed(100, 200);
    assert_eq!(harness.loader.requests().len(), 1);

    harness.engine.on_surface_changed(50, 60);
    assert_eq!(harness.loader.requests().len(), 2);

    let mut settings = harness.store.snapshot();
    settings.background_uri = "file:///b.png".into();
    harness.store.apply(settings);
    harness.engine.run_pending();

    let requests = harness.loader.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].uri, "file:///b.png");
    assert_eq!((requests[2].width, requests[2].height), (50, 60));
}

#[test]
fn visible_then_invisible_before_loop_runs_never_draws() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(true);
    harness.engine.on_visibility_changed(false);

    harness.clock.advance(Duration::from_secs(1));
    assert_eq!(harness.engine.run_pending(), 0);
    assert_eq!(harness.engine.simulator().draws, 0);
    assert!(!harness.engine.simulator().running);
}

#[test]
fn frames_follow_frame_delay() {
    let mut harness = Harness::created(8, 8);
    assert_eq!(harness.engine.frame_delay(), Duration::from_millis(10));

    let start = harness.clock.now();
    harness.engine.on_visibility_changed(true);
    assert_eq!(harness.engine.next_frame_at(), Some(start));
    assert_eq!(harness.engine.run_pending(), 1);

    assert_eq!(
        harness.engine.next_frame_at(),
        Some(start + Duration::from_millis(10))
    );
    harness.clock.advance(Duration::from_millis(9));
    assert_eq!(harness.engine.run_pending(), 0);
    harness.clock.advance(Duration::from_millis(1));
    assert_eq!(harness.engine.run_pending(), 1);
    assert_eq!(harness.engine.simulator().draws, 2);
    assert_eq!(harness.engine.simulator().advances, 2);
}

#[test]
fn frame_delay_change_applies_to_next_schedule() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(true);
    harness.engine.run_pending();

    let mut settings = harness.store.snapshot();
    settings.frame_delay = Duration::from_millis(40);
    harness.store.apply(settings);
    harness.clock.advance(Duration::from_millis(10));
    let now = harness.clock.now();
    assert_eq!(harness.engine.run_pending(), 1);

    assert_eq!(harness.engine.frame_delay(), Duration::from_millis(40));
    assert_eq!(
        harness.engine.next_frame_at(),
        Some(now + Duration::from_millis(40))
    );
}

#[test]
fn unavailable_surface_skips_visuals_but_keeps_cadence() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(true);
    harness.engine.surface_mut().unavailable = true;

    assert_eq!(harness.engine.run_pending(), 1);
    assert_eq!(harness.engine.simulator().draws, 0);
    assert_eq!(harness.engine.pending_frames(), 1);

    harness.engine.surface_mut().unavailable = false;
    harness.clock.advance(Duration::from_millis(10));
    harness.engine.run_pending();
    assert_eq!(harness.engine.simulator().draws, 1);
}

#[test]
fn solid_color_fills_whole_surface() {
    let mut settings = Settings::default();
    settings.background_color = Color::from_rgb(0, 128, 255);
    let mut harness = Harness::new(settings, 6, 4);
    harness.engine.on_create();
    harness.engine.on_surface_changed(6, 4);

    harness.engine.draw();

    let frame = harness.engine.surface().inner.snapshot().expect("frame");
    assert!(frame.pixels().all(|pixel| pixel.0 == [0, 128, 255, 255]));
}

#[test]
fn panicking_simulator_still_releases_surface() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(true);
    harness.engine.simulator_mut().panic_on_draw = true;

    let outcome = catch_unwind(AssertUnwindSafe(|| harness.engine.draw()));

    assert!(outcome.is_err());
    let surface = harness.engine.surface();
    assert_eq!(surface.acquired, 1);
    assert_eq!(surface.released, 1);
    assert!(!surface.inner.is_locked());
}

#[test]
fn surface_destroyed_stops_loop() {
    let mut harness = Harness::created(8, 8);
    harness.engine.on_visibility_changed(true);
    harness.engine.run_pending();

    harness.engine.on_surface_destroyed();

    assert!(!harness.engine.is_visible());
    assert_eq!(harness.engine.pending_frames(), 0);
    assert!(!harness.engine.simulator().running);
    harness.clock.advance(Duration::from_secs(1));
    assert_eq!(harness.engine.run_pending(), 0);
}

#[test]
fn destroy_releases_subscriptions() {
    let mut harness = Harness::created(8, 8);
    assert_eq!(harness.store.background_uri().subscriber_count(), 1);
    assert_eq!(harness.store.particles().subscriber_count(), 1);

    harness.engine.on_destroy();

    assert_eq!(harness.store.background_uri().subscriber_count(), 0);
    assert_eq!(harness.store.background_color().subscriber_count(), 0);
    assert_eq!(harness.store.frame_delay().subscriber_count(), 0);
    assert_eq!(harness.store.particles().subscriber_count(), 0);

    let configured = harness.engine.simulator().configured;
    let mut settings = harness.store.snapshot();
    settings.particles.density = 5;
    harness.store.apply(settings);
    harness.engine.run_pending();
    assert_eq!(harness.engine.simulator().configured, configured);
}

#[test]
fn inline_loader_decodes_real_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bg.png");
    solid(40, 20, [0, 255, 0, 255]).save(&path).unwrap();

    let mut settings = Settings::default();
    settings.background_uri = format!("file://{}", path.display());
    let store = SettingsStore::new(settings);
    let mut engine = RenderLoopEngine::new(
        Arc::new(store),
        Box::new(InlineImageLoader),
        RecordingSimulator::default(),
        SoftwareSurface::new(10, 10),
        ManualClock::new(),
    );
    engine.on_create();
    engine.on_surface_changed(10, 10);
    engine.run_pending();

    let background = engine.background().expect("decoded background");
    assert_eq!(background.dimensions(), (10, 10));
    assert_eq!(background.get_pixel(5, 5).0, [0, 255, 0, 255]);

    engine.draw();
    let frame = engine.surface().snapshot().expect("frame");
    assert_eq!(frame.get_pixel(9, 9).0, [0, 255, 0, 255]);
}
