//! Sound playback surfaces

use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A single request to play a sound file
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    /// Absolute or sound-dir-relative path of the file
    pub path: PathBuf,
    /// Volume, 0.0 to 1.0
    pub volume: f32,
}

impl PlayRequest {
    /// Build a request for `file` inside `dir` (or the working directory)
    pub fn new(dir: Option<&Path>, file: &str, volume: f32) -> Self {
        let path = match dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        };
        Self { path, volume }
    }
}

/// Something that can make noise
pub trait SoundSurface: Send + Sync {
    /// Start playing; must not block until playback ends
    fn play(&self, request: &PlayRequest) -> Result<()>;
}

type SurfaceFactory = Box<dyn Fn() -> Result<Arc<dyn SoundSurface>> + Send + Sync>;

/// A surface created on first use and reused afterwards
///
/// A failed creation is not cached, the next play tries again.
pub struct LazySurface {
    factory: SurfaceFactory,
    surface: Mutex<Option<Arc<dyn SoundSurface>>>,
}

impl LazySurface {
    /// Wrap a factory
    pub fn new(
        factory: impl Fn() -> Result<Arc<dyn SoundSurface>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            surface: Mutex::new(None),
        }
    }

    /// The platform default: the audio device when built with `audio`,
    /// the terminal bell otherwise
    pub fn platform_default() -> Self {
        #[cfg(feature = "audio")]
        {
            Self::new(|| Ok(Arc::new(rodio_surface::RodioSurface::open()?) as Arc<dyn SoundSurface>))
        }
        #[cfg(not(feature = "audio"))]
        {
            Self::new(|| Ok(Arc::new(BellSurface) as Arc<dyn SoundSurface>))
        }
    }

    /// Whether the underlying surface exists yet
    pub fn is_created(&self) -> bool {
        self.surface.lock().is_some()
    }

    fn get(&self) -> Result<Arc<dyn SoundSurface>> {
        let mut slot = self.surface.lock();
        if let Some(surface) = slot.as_ref() {
            return Ok(Arc::clone(surface));
        }
        let surface = (self.factory)()?;
        tracing::debug!("Sound surface created");
        *slot = Some(Arc::clone(&surface));
        Ok(surface)
    }
}

impl SoundSurface for LazySurface {
    fn play(&self, request: &PlayRequest) -> Result<()> {
        self.get()?.play(request)
    }
}

/// Rings the terminal bell; volume and file are ignored
#[derive(Debug, Default, Clone, Copy)]
pub struct BellSurface;

impl SoundSurface for BellSurface {
    fn play(&self, request: &PlayRequest) -> Result<()> {
        tracing::debug!("Bell for {}", request.path.display());
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| Error::Sound(e.to_string()))
    }
}

#[cfg(feature = "audio")]
mod rodio_surface {
    use super::{PlayRequest, SoundSurface};
    use crate::error::{Error, Result};
    use std::io::BufReader;
    use std::sync::mpsc;

    /// Plays files on the default output device
    ///
    /// The output stream lives on a dedicated thread; requests are handed to
    /// it over a channel.
    pub struct RodioSurface {
        tx: parking_lot::Mutex<mpsc::Sender<PlayRequest>>,
    }

    impl RodioSurface {
        pub fn open() -> Result<Self> {
            let (tx, rx) = mpsc::channel::<PlayRequest>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

            std::thread::Builder::new()
                .name("chime-audio".into())
                .spawn(move || {
                    let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(Error::Sound(e.to_string())));
                            return;
                        }
                    };
                    while let Ok(request) = rx.recv() {
                        if let Err(e) = play_one(&stream, &request) {
                            tracing::warn!("Failed to play {}: {}", request.path.display(), e);
                        }
                    }
                })
                .map_err(|e| Error::Sound(e.to_string()))?;

            ready_rx
                .recv()
                .map_err(|_| Error::Sound("audio thread exited".into()))??;
            Ok(Self {
                tx: parking_lot::Mutex::new(tx),
            })
        }
    }

    fn play_one(stream: &rodio::OutputStream, request: &PlayRequest) -> Result<()> {
        let file = std::fs::File::open(&request.path).map_err(|e| Error::Sound(e.to_string()))?;
        let decoder =
            rodio::Decoder::new(BufReader::new(file)).map_err(|e| Error::Sound(e.to_string()))?;
        let sink = rodio::Sink::connect_new(stream.mixer());
        sink.set_volume(request.volume);
        sink.append(decoder);
        sink.detach();
        Ok(())
    }

    impl SoundSurface for RodioSurface {
        fn play(&self, request: &PlayRequest) -> Result<()> {
            self.tx
                .lock()
                .send(request.clone())
                .map_err(|_| Error::Sound("audio thread exited".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSurface {
        plays: AtomicUsize,
    }

    impl SoundSurface for CountingSurface {
        fn play(&self, _request: &PlayRequest) -> Result<()> {
            self.plays.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_play_request_path() {
        let r = PlayRequest::new(Some(Path::new("/sounds")), "ding.mp3", 0.5);
        assert_eq!(r.path, PathBuf::from("/sounds/ding.mp3"));
        let r = PlayRequest::new(None, "ding.mp3", 0.5);
        assert_eq!(r.path, PathBuf::from("ding.mp3"));
    }

    #[test]
    fn test_lazy_surface_created_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(CountingSurface::default());
        let created_clone = created.clone();
        let inner_clone = inner.clone();
        let lazy = LazySurface::new(move || {
            created_clone.fetch_add(1, Ordering::Relaxed);
            Ok(inner_clone.clone() as Arc<dyn SoundSurface>)
        });

        assert!(!lazy.is_created());
        let req = PlayRequest::new(None, "default.wav", 0.7);
        lazy.play(&req).unwrap();
        lazy.play(&req).unwrap();

        assert!(lazy.is_created());
        assert_eq!(created.load(Ordering::Relaxed), 1);
        assert_eq!(inner.plays.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_lazy_surface_retries_failed_creation() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let lazy = LazySurface::new(move || {
            let n = attempts_clone.fetch_add(1, Ordering::Relaxed);
            if n == 0 {
                Err(Error::Sound("no device".into()))
            } else {
                Ok(Arc::new(CountingSurface::default()) as Arc<dyn SoundSurface>)
            }
        });

        let req = PlayRequest::new(None, "default.wav", 0.7);
        assert!(lazy.play(&req).is_err());
        assert!(!lazy.is_created());
        assert!(lazy.play(&req).is_ok());
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }
}
