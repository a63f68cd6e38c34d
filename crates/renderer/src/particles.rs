//! Particle field simulation.
//!
//! Dots drift in straight lines at a per-particle speed. Pairs closer than
//! the configured line distance are joined by a line whose alpha fades to
//! zero at that distance. Dots leaving the bounds respawn on a random edge,
//! heading back in.

use std::f32::consts::TAU;

use rand::prelude::*;
use settings::{Color, ParticleSettings};

use crate::runtime::{BoxedTimeSource, SystemTimeSource, TimeSource};
use crate::surface::Canvas;

/// Speed scale: one unit of velocity is one pixel per 60 Hz tick.
const TICKS_PER_SECOND: f32 = 60.0;
const MIN_SPEED: f32 = 0.2;
const MAX_SPEED: f32 = 1.0;
/// Upper bound on a single step so a stall does not teleport every dot.
const MAX_STEP_SECONDS: f32 = 0.25;

pub trait ParticleSimulator {
    fn set_bounds(&mut self, left: i32, top: i32, right: i32, bottom: i32);
    /// Resumes internal time; the next advance starts from zero delta.
    fn start(&mut self);
    fn stop(&mut self);
    fn draw(&mut self, canvas: &mut Canvas);
    /// One simulation tick.
    fn advance(&mut self);
    fn configure(&mut self, params: &ParticleSettings);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0) as f32
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0) as f32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    /// Unit direction.
    pub dx: f32,
    pub dy: f32,
    pub speed: f32,
    pub radius: f32,
}

pub struct ParticleField {
    params: ParticleSettings,
    bounds: Bounds,
    particles: Vec<Particle>,
    rng: StdRng,
    time: BoxedTimeSource,
    last_seconds: Option<f32>,
    running: bool,
}

impl ParticleField {
    pub fn new(params: ParticleSettings, seed: u64) -> Self {
        Self::with_time_source(params, seed, Box::new(SystemTimeSource::new()))
    }

    pub fn with_time_source(params: ParticleSettings, seed: u64, time: BoxedTimeSource) -> Self {
        Self {
            params,
            bounds: Bounds::default(),
            particles: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            time,
            last_seconds: None,
            running: false,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn params(&self) -> &ParticleSettings {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn respawn_all(&mut self) {
        self.particles.clear();
        if self.bounds.is_empty() {
            return;
        }
        for _ in 0..self.params.density {
            let particle = self.spawn_inside();
            self.particles.push(particle);
        }
    }

    fn random_radius(&mut self) -> f32 {
        let (min, max) = (self.params.dot_radius_min, self.params.dot_radius_max);
        if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        }
    }

    fn spawn_inside(&mut self) -> Particle {
        let angle: f32 = self.rng.gen_range(0.0..TAU);
        Particle {
            x: self.bounds.left as f32 + self.rng.gen::<f32>() * self.bounds.width(),
            y: self.bounds.top as f32 + self.rng.gen::<f32>() * self.bounds.height(),
            dx: angle.cos(),
            dy: angle.sin(),
            speed: self.rng.gen_range(MIN_SPEED..=MAX_SPEED),
            radius: self.random_radius(),
        }
    }

    /// New particle just outside a random edge, pointing into the field.
    fn spawn_on_edge(&mut self) -> Particle {
        let radius = self.random_radius();
        let b = self.bounds;
        let (left, top, right, bottom) = (
            b.left as f32,
            b.top as f32,
            b.right as f32,
            b.bottom as f32,
        );
        // Angle ranges open toward the field interior; y grows downwards.
        let (x, y, angle_range) = match self.rng.gen_range(0..4) {
            0 => (left - radius, self.rng.gen_range(top..=bottom), -0.45..0.45),
            1 => (right + radius, self.rng.gen_range(top..=bottom), 2.69..3.59),
            2 => (self.rng.gen_range(left..=right), top - radius, 1.12..2.02),
            _ => (self.rng.gen_range(left..=right), bottom + radius, 4.26..5.16),
        };
        let angle: f32 = self.rng.gen_range(angle_range);
        Particle {
            x,
            y,
            dx: angle.cos(),
            dy: angle.sin(),
            speed: self.rng.gen_range(MIN_SPEED..=MAX_SPEED),
            radius,
        }
    }

    fn is_outside(&self, particle: &Particle) -> bool {
        let margin = particle.radius;
        particle.x < self.bounds.left as f32 - margin
            || particle.x > self.bounds.right as f32 + margin
            || particle.y < self.bounds.top as f32 - margin
            || particle.y > self.bounds.bottom as f32 + margin
    }

    fn step(&mut self, seconds: f32) {
        let ticks = seconds.clamp(0.0, MAX_STEP_SECONDS) * TICKS_PER_SECOND;
        let factor = ticks * self.params.speed_factor;
        for index in 0..self.particles.len() {
            let moved = {
                let p = &mut self.particles[index];
                p.x += p.dx * p.speed * factor;
                p.y += p.dy * p.speed * factor;
                *p
            };
            if self.is_outside(&moved) {
                self.particles[index] = self.spawn_on_edge();
            }
        }
    }
}

impl ParticleSimulator for ParticleField {
    fn set_bounds(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        let bounds = Bounds {
            left,
            top,
            right,
            bottom,
        };
        if bounds != self.bounds {
            self.bounds = bounds;
            self.respawn_all();
        }
    }

    fn start(&mut self) {
        self.running = true;
        self.last_seconds = None;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn draw(&mut self, canvas: &mut Canvas) {
        let color = self.params.color;
        let distance_limit = self.params.line_distance;
        let thickness = self.params.line_scale;
        for (i, a) in self.particles.iter().enumerate() {
            for b in &self.particles[i + 1..] {
                let distance = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                if distance < distance_limit {
                    let line = resolve_line_color(u8::MAX, color, distance_limit, distance);
                    canvas.draw_line((a.x, a.y), (b.x, b.y), thickness, line);
                }
            }
        }
        for p in &self.particles {
            canvas.fill_circle(p.x, p.y, p.radius, color);
        }
    }

    fn advance(&mut self) {
        if !self.running {
            return;
        }
        let now = self.time.now_seconds();
        let delta = self.last_seconds.map_or(0.0, |last| now - last);
        self.last_seconds = Some(now);
        self.step(delta);
    }

    fn configure(&mut self, params: &ParticleSettings) {
        let previous = std::mem::replace(&mut self.params, params.clone());
        let radii_changed = previous.dot_radius_min != params.dot_radius_min
            || previous.dot_radius_max != params.dot_radius_max;
        if radii_changed {
            self.respawn_all();
            return;
        }
        let target = if self.bounds.is_empty() {
            0
        } else {
            params.density as usize
        };
        if target < self.particles.len() {
            self.particles.truncate(target);
        }
        while self.particles.len() < target {
            let particle = self.spawn_inside();
            self.particles.push(particle);
        }
    }
}

/// Line color for two dots `distance` apart: alpha fades linearly from the
/// line color's own alpha at zero distance to transparent at `line_distance`.
pub fn resolve_line_color(
    scene_alpha: u8,
    line_color: Color,
    line_distance: f32,
    distance: f32,
) -> Color {
    if line_distance <= 0.0 {
        return line_color.with_alpha(0);
    }
    let rate = (1.0 - distance / line_distance).clamp(0.0, 1.0);
    let alpha = line_color.alpha() as f32 * rate * (scene_alpha as f32 / 255.0);
    line_color.with_alpha(alpha.round() as u8)
}
