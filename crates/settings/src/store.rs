use std::time::Duration;

use crate::{Color, Observable, ParticleSettings, Settings};

/// Live view of the wallpaper settings.
///
/// Each accessor exposes one setting as an [`Observable`]: subscribing
/// replays the current value and then every change, `current()` is the
/// synchronous point-read.
pub trait SettingsSource: Send + Sync {
    fn background_uri(&self) -> &Observable<String>;
    fn background_color(&self) -> &Observable<Color>;
    fn frame_delay(&self) -> &Observable<Duration>;
    fn particles(&self) -> &Observable<ParticleSettings>;
}

/// In-memory settings source seeded from a [`Settings`] document.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    background_uri: Observable<String>,
    background_color: Observable<Color>,
    frame_delay: Observable<Duration>,
    particles: Observable<ParticleSettings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            background_uri: Observable::new(settings.background_uri),
            background_color: Observable::new(settings.background_color),
            frame_delay: Observable::new(settings.frame_delay),
            particles: Observable::new(settings.particles),
        }
    }

    /// Publishes every setting that differs from the current value.
    pub fn apply(&self, settings: Settings) {
        if self.background_uri.current() != settings.background_uri {
            tracing::trace!(uri = %settings.background_uri, "background uri changed");
            self.background_uri.set(settings.background_uri);
        }
        if self.background_color.current() != settings.background_color {
            tracing::trace!(color = %settings.background_color, "background color changed");
            self.background_color.set(settings.background_color);
        }
        if self.frame_delay.current() != settings.frame_delay {
            tracing::trace!(delay = ?settings.frame_delay, "frame delay changed");
            self.frame_delay.set(settings.frame_delay);
        }
        if self.particles.current() != settings.particles {
            tracing::trace!("particle settings changed");
            self.particles.set(settings.particles);
        }
    }

    pub fn snapshot(&self) -> Settings {
        Settings {
            version: 1,
            background_uri: self.background_uri.current(),
            background_color: self.background_color.current(),
            frame_delay: self.frame_delay.current(),
            particles: self.particles.current(),
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl SettingsSource for SettingsStore {
    fn background_uri(&self) -> &Observable<String> {
        &self.background_uri
    }

    fn background_color(&self) -> &Observable<Color> {
        &self.background_color
    }

    fn frame_delay(&self) -> &Observable<Duration> {
        &self.frame_delay
    }

    fn particles(&self) -> &Observable<ParticleSettings> {
        &self.particles
    }
}
