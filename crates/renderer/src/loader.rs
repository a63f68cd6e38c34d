use std::path::PathBuf;
use std::thread;

use crossbeam_channel::Sender;
use image::imageops::FilterType;
use image::GenericImageView;

use crate::engine::EngineEvent;
use crate::surface::Bitmap;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unsupported image uri '{0}'")]
    UnsupportedUri(String),
    #[error("cannot fit a background into a {0}x{1} target")]
    EmptyTarget(u32, u32),
    #[error("failed to decode background '{uri}': {source}")]
    Decode {
        uri: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to start background loader: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Image to decode and center-crop to the surface size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

/// Return address for one load; results land on the engine's event queue.
#[derive(Debug, Clone)]
pub struct LoadReply {
    generation: u64,
    events: Sender<EngineEvent>,
}

impl LoadReply {
    pub(crate) fn new(generation: u64, events: Sender<EngineEvent>) -> Self {
        Self { generation, events }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deliver(self, result: Result<Bitmap, LoadError>) {
        let event = EngineEvent::BackgroundLoaded {
            generation: self.generation,
            result,
        };
        if self.events.send(event).is_err() {
            tracing::trace!(
                generation = self.generation,
                "engine gone before background load finished"
            );
        }
    }
}

pub trait BackgroundImageLoader {
    /// Starts loading `request`; the outcome must be handed to `reply`.
    fn load(&self, request: ImageRequest, reply: LoadReply);
}

/// Decodes on a short-lived worker thread per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadedImageLoader;

impl BackgroundImageLoader for ThreadedImageLoader {
    fn load(&self, request: ImageRequest, reply: LoadReply) {
        let fallback = reply.clone();
        let spawned = thread::Builder::new()
            .name("background-loader".into())
            .spawn(move || reply.deliver(load_center_cropped(&request)));
        if let Err(err) = spawned {
            fallback.deliver(Err(LoadError::Spawn(err)));
        }
    }
}

/// Decodes on the calling thread; the result still goes through the queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineImageLoader;

impl BackgroundImageLoader for InlineImageLoader {
    fn load(&self, request: ImageRequest, reply: LoadReply) {
        reply.deliver(load_center_cropped(&request));
    }
}

/// Accepts `file://` URIs and bare filesystem paths.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, LoadError> {
    if let Some(path) = uri.strip_prefix("file://") {
        if path.is_empty() {
            return Err(LoadError::UnsupportedUri(uri.to_string()));
        }
        return Ok(PathBuf::from(path));
    }
    if uri.is_empty() || uri.contains("://") {
        return Err(LoadError::UnsupportedUri(uri.to_string()));
    }
    Ok(PathBuf::from(uri))
}

/// Scales the image to cover the target and crops the overflow evenly.
pub fn load_center_cropped(request: &ImageRequest) -> Result<Bitmap, LoadError> {
    if request.width == 0 || request.height == 0 {
        return Err(LoadError::EmptyTarget(request.width, request.height));
    }
    let path = uri_to_path(&request.uri)?;
    let decoded = image::open(&path).map_err(|source| LoadError::Decode {
        uri: request.uri.clone(),
        source,
    })?;
    let cropped = decoded.resize_to_fill(request.width, request.height, FilterType::Triangle);
    tracing::debug!(
        uri = %request.uri,
        source_width = decoded.width(),
        source_height = decoded.height(),
        width = request.width,
        height = request.height,
        "decoded background"
    );
    Ok(cropped.to_rgba8())
}
