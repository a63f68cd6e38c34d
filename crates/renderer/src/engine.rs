//! Per-surface render loop.
//!
//! [`RenderLoopEngine`] owns the visible/invisible lifecycle, the frame
//! cadence and background compositing, and hands particle drawing to a
//! [`ParticleSimulator`]. Everything that mutates engine state runs on the
//! thread that calls into the engine: settings callbacks and image loaders
//! only post [`EngineEvent`]s, which the engine drains in
//! [`RenderLoopEngine::run_pending`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use scheduler::{Clock, SystemClock, TaskQueue};
use settings::{Color, ParticleSettings, SettingsSource, Subscription, DEFAULT_FRAME_DELAY};

use crate::loader::{BackgroundImageLoader, ImageRequest, LoadError, LoadReply};
use crate::particles::ParticleSimulator;
use crate::surface::{Bitmap, Canvas, PresentationSurface, SurfaceFrame};

/// Messages posted to the engine from settings streams and loaders.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    BackgroundUri(String),
    BackgroundColor(Color),
    FrameDelay(Duration),
    Particles(ParticleSettings),
    BackgroundLoaded {
        generation: u64,
        result: Result<Bitmap, LoadError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineTask {
    Draw,
}

#[derive(Default)]
struct Subscriptions {
    background_uri: Option<Subscription>,
    background_color: Option<Subscription>,
    frame_delay: Option<Subscription>,
    // Forwards particle parameters to the simulator.
    configurator: Option<Subscription>,
}

impl Subscriptions {
    fn dispose(&mut self) {
        for slot in [
            &mut self.background_uri,
            &mut self.background_color,
            &mut self.frame_delay,
            &mut self.configurator,
        ] {
            if let Some(mut subscription) = slot.take() {
                subscription.dispose();
            }
        }
    }
}

pub struct RenderLoopEngine<P, S, C = SystemClock>
where
    P: ParticleSimulator,
    S: PresentationSurface,
    C: Clock,
{
    settings: Arc<dyn SettingsSource>,
    loader: Box<dyn BackgroundImageLoader>,
    simulator: P,
    surface: S,
    queue: TaskQueue<EngineTask, C>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    subscriptions: Subscriptions,
    visible: bool,
    destroyed: bool,
    width: u32,
    height: u32,
    background_color: Color,
    background: Option<Bitmap>,
    background_generation: u64,
    loading_generation: Option<u64>,
    // Request behind the in-flight or applied background.
    background_source: Option<ImageRequest>,
    frame_delay: Duration,
    frames_drawn: u64,
}

impl<P, S, C> RenderLoopEngine<P, S, C>
where
    P: ParticleSimulator,
    S: PresentationSurface,
    C: Clock,
{
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        loader: Box<dyn BackgroundImageLoader>,
        simulator: P,
        surface: S,
        clock: C,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            settings,
            loader,
            simulator,
            surface,
            queue: TaskQueue::with_clock(clock),
            events_tx,
            events_rx,
            subscriptions: Subscriptions::default(),
            visible: false,
            destroyed: false,
            width: 0,
            height: 0,
            background_color: Color::BLACK,
            background: None,
            background_generation: 0,
            loading_generation: None,
            background_source: None,
            frame_delay: DEFAULT_FRAME_DELAY,
            frames_drawn: 0,
        }
    }

    /// Subscribes to the settings streams. Replayed current values are
    /// applied before this returns.
    pub fn on_create(&mut self) {
        if self.destroyed {
            tracing::warn!("on_create called on a destroyed engine");
            return;
        }
        self.subscriptions.dispose();

        let tx = self.events_tx.clone();
        self.subscriptions.background_uri = Some(self.settings.background_uri().subscribe(
            move |uri: &String| {
                forward(&tx, EngineEvent::BackgroundUri(uri.clone()));
            },
        ));

        let tx = self.events_tx.clone();
        self.subscriptions.background_color = Some(self.settings.background_color().subscribe(
            move |color: &Color| {
                forward(&tx, EngineEvent::BackgroundColor(*color));
            },
        ));

        let tx = self.events_tx.clone();
        self.subscriptions.frame_delay = Some(self.settings.frame_delay().subscribe(
            move |delay: &Duration| {
                forward(&tx, EngineEvent::FrameDelay(*delay));
            },
        ));

        let tx = self.events_tx.clone();
        self.subscriptions.configurator = Some(self.settings.particles().subscribe(
            move |params: &ParticleSettings| {
                forward(&tx, EngineEvent::Particles(params.clone()));
            },
        ));

        tracing::debug!("engine created");
        self.drain_events();
    }

    /// Releases every subscription and halts the loop for good.
    pub fn on_destroy(&mut self) {
        self.subscriptions.dispose();
        self.queue.clear();
        self.simulator.stop();
        self.visible = false;
        self.destroyed = true;
        self.loading_generation = None;
        // Anything still queued belongs to a dead engine.
        while self.events_rx.try_recv().is_ok() {}
        tracing::debug!(frames = self.frames_drawn, "engine destroyed");
    }

    pub fn on_surface_changed(&mut self, width: u32, height: u32) {
        if self.destroyed {
            return;
        }
        tracing::debug!(width, height, "surface changed");
        self.width = width;
        self.height = height;
        self.simulator
            .set_bounds(0, 0, clamp_i32(width), clamp_i32(height));
        let uri = self.settings.background_uri().current();
        self.handle_background(&uri);
    }

    pub fn on_surface_destroyed(&mut self) {
        tracing::debug!("surface destroyed");
        self.visible = false;
        self.queue.remove(&EngineTask::Draw);
        self.simulator.stop();
    }

    pub fn on_visibility_changed(&mut self, visible: bool) {
        if self.destroyed {
            return;
        }
        tracing::debug!(visible, "visibility changed");
        self.visible = visible;
        if visible {
            self.simulator.start();
            self.queue.remove(&EngineTask::Draw);
            self.queue.post(EngineTask::Draw);
        } else {
            self.queue.remove(&EngineTask::Draw);
            self.simulator.stop();
        }
    }

    /// Applies a background URI: empty clears, anything else loads once the
    /// surface size is known.
    pub fn handle_background(&mut self, uri: &str) {
        if self.destroyed {
            return;
        }
        // Any newer decision supersedes an in-flight load.
        self.background_generation += 1;
        self.loading_generation = None;
        self.background_source = None;

        if uri.is_empty() {
            self.background = None;
            return;
        }
        if self.width == 0 || self.height == 0 {
            tracing::trace!(uri, "surface size unknown; background deferred");
            return;
        }

        let generation = self.background_generation;
        self.loading_generation = Some(generation);
        let request = ImageRequest {
            uri: uri.to_string(),
            width: self.width,
            height: self.height,
        };
        tracing::debug!(
            uri,
            width = self.width,
            height = self.height,
            generation,
            "requesting background"
        );
        self.background_source = Some(request.clone());
        self.loader
            .load(request, LoadReply::new(generation, self.events_tx.clone()));
    }

    /// One frame: composite, draw and advance the simulator, reschedule.
    pub fn draw(&mut self) {
        if self.destroyed {
            return;
        }
        match SurfaceFrame::acquire(&mut self.surface) {
            Some(mut frame) => {
                composite_background(
                    &mut frame,
                    self.background.as_ref(),
                    self.background_color,
                    self.width,
                    self.height,
                );
                self.simulator.draw(&mut frame);
                self.simulator.advance();
                self.frames_drawn += 1;
            }
            None => tracing::trace!("surface unavailable; frame skipped"),
        }

        self.queue.remove(&EngineTask::Draw);
        if self.visible {
            if let Err(err) = self.queue.post_delayed(EngineTask::Draw, self.frame_delay) {
                tracing::warn!(%err, "failed to schedule next frame");
            }
        }
    }

    /// Applies queued events, then runs every frame that is due. Returns the
    /// number of frames run.
    pub fn run_pending(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        self.drain_events();
        let due = self.queue.take_due();
        let mut ran = 0;
        for task in due {
            if self.destroyed {
                break;
            }
            match task {
                EngineTask::Draw => {
                    self.draw();
                    ran += 1;
                }
            }
        }
        ran
    }

    /// Blocks until the next frame is due, an event arrives or `timeout`
    /// passes, then runs whatever is pending.
    pub fn wait_and_run(&mut self, timeout: Duration) -> usize {
        if self.destroyed {
            return 0;
        }
        let now = self.queue.clock().now();
        let mut wait = timeout;
        if let Some(deadline) = self.queue.next_deadline() {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        if !wait.is_zero() {
            match self.events_rx.recv_timeout(wait) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                // The engine holds a sender itself, so this cannot happen.
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        self.run_pending()
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::BackgroundUri(uri) => {
                if self.is_current_background(&uri) {
                    tracing::trace!(%uri, "background already requested for this surface");
                } else {
                    self.handle_background(&uri);
                }
            }
            EngineEvent::BackgroundColor(color) => self.background_color = color,
            EngineEvent::FrameDelay(delay) => self.frame_delay = delay,
            EngineEvent::Particles(params) => self.simulator.configure(&params),
            EngineEvent::BackgroundLoaded { generation, result } => {
                self.apply_background(generation, result)
            }
        }
    }

    /// A queued URI emission can trail an `on_surface_changed` that already
    /// requested the same image at the same size.
    fn is_current_background(&self, uri: &str) -> bool {
        self.background_source.as_ref().is_some_and(|source| {
            source.uri == uri && source.width == self.width && source.height == self.height
        })
    }

    fn apply_background(&mut self, generation: u64, result: Result<Bitmap, LoadError>) {
        if self.loading_generation != Some(generation) {
            tracing::debug!(
                generation,
                latest = self.background_generation,
                "discarding stale background result"
            );
            return;
        }
        self.loading_generation = None;
        match result {
            Ok(bitmap) => {
                tracing::debug!(
                    width = bitmap.width(),
                    height = bitmap.height(),
                    "background loaded"
                );
                self.background = Some(bitmap);
            }
            Err(err) => {
                tracing::warn!(%err, "background failed to load; using solid color");
                self.background = None;
                self.background_source = None;
            }
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn background(&self) -> Option<&Bitmap> {
        self.background.as_ref()
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn frame_delay(&self) -> Duration {
        self.frame_delay
    }

    /// Number of scheduled, not yet run frames.
    pub fn pending_frames(&self) -> usize {
        self.queue.count(&EngineTask::Draw)
    }

    pub fn next_frame_at(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    pub fn is_loading_background(&self) -> bool {
        self.loading_generation.is_some()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn simulator(&self) -> &P {
        &self.simulator
    }

    pub fn simulator_mut(&mut self) -> &mut P {
        &mut self.simulator
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

impl<P, S, C> Drop for RenderLoopEngine<P, S, C>
where
    P: ParticleSimulator,
    S: PresentationSurface,
    C: Clock,
{
    fn drop(&mut self) {
        self.subscriptions.dispose();
    }
}

fn composite_background(
    canvas: &mut Canvas,
    background: Option<&Bitmap>,
    color: Color,
    width: u32,
    height: u32,
) {
    match background {
        // Pre-sized to the surface at load time.
        Some(bitmap) => canvas.draw_bitmap(bitmap, 0, 0),
        None => canvas.fill_rect(0.0, 0.0, width as f32, height as f32, color),
    }
}

fn forward(events: &Sender<EngineEvent>, event: EngineEvent) {
    if events.send(event).is_err() {
        tracing::trace!("engine gone; settings emission dropped");
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
