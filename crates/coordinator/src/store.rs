//! Where the rig is, and where HOME is, persisted across restarts.
//!
//! This never fails: if the saved state is missing or garbled we fall back to
//! the factory defaults, and if saving fails we log it and carry on. The
//! rig is still controllable either way; the operator just might have to
//! recalibrate.

use std::{
    collections::BTreeMap,
    io,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use log::warn;
use sera_geom::{Offset, Point, RigConfig};
use sera_protocol::Xy;
use serde_json::Value;

pub const KEY_POSITION: &str = "position";
pub const KEY_HOME: &str = "home";
pub const KEY_OFFSET: &str = "offset";

/// Somewhere to keep a handful of small JSON values.
///
/// There's only ever one writer, so the last write wins.
pub trait Backend {
    fn read(&self, key: &str) -> Option<Value>;
    fn write(&self, key: &str, value: Value) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Keeps everything in memory. Clones share the same storage, which is
/// handy for simulating a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryBackend {
    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn read(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn write(&self, key: &str, value: Value) -> io::Result<()> {
        self.values().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.values().remove(key);
        Ok(())
    }
}

/// Keeps everything in a single JSON file, with one entry per key.
#[derive(Clone, Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBackend { path: path.into() }
    }

    fn load(&self) -> io::Result<serde_json::Map<String, Value>> {
        match std::fs::read(&self.path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is not a JSON object", self.path.display()),
                )),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(e),
        }
    }

    fn store(&self, map: serde_json::Map<String, Value>) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_vec_pretty(&Value::Object(map)).map_err(io::Error::other)?;
        // Write-then-rename, so that a crash halfway through doesn't
        // leave us with half a file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)
    }

    // A garbled file is as good as an empty one: the next write replaces it.
    fn load_or_empty(&self) -> serde_json::Map<String, Value> {
        self.load().unwrap_or_else(|e| {
            warn!("ignoring saved state: {e}");
            serde_json::Map::new()
        })
    }
}

impl Backend for FileBackend {
    fn read(&self, key: &str) -> Option<Value> {
        self.load_or_empty().remove(key)
    }

    fn write(&self, key: &str, value: Value) -> io::Result<()> {
        let mut map = self.load_or_empty();
        map.insert(key.to_owned(), value);
        self.store(map)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut map = self.load_or_empty();
        if map.remove(key).is_some() {
            self.store(map)?;
        }
        Ok(())
    }
}

fn read_point<B: Backend>(backend: &B, key: &str) -> Option<Point> {
    let value = backend.read(key)?;
    match serde_json::from_value::<Xy>(value.clone()) {
        Ok(xy) if xy.x.is_finite() && xy.y.is_finite() => Some(xy.into()),
        _ => {
            warn!("ignoring saved {key}: {value}");
            None
        }
    }
}

fn write_point<B: Backend>(backend: &B, key: &str, p: Point) {
    let result = serde_json::to_value(Xy::from(p))
        .map_err(io::Error::other)
        .and_then(|value| backend.write(key, value));
    if let Err(e) = result {
        warn!("failed to save {key}: {e}");
    }
}

/// The coordinator's idea of where the carriage is, and where HOME is.
pub struct PositionStore<B> {
    backend: B,
    rig: RigConfig,
    position: Point,
    home: Point,
    offset: Offset,
}

impl<B: Backend> PositionStore<B> {
    /// Loads the saved state, falling back to defaults for anything missing.
    pub fn load(rig: RigConfig, backend: B) -> Self {
        let default_home = rig.default_home();
        let position = read_point(&backend, KEY_POSITION).unwrap_or(default_home);
        let home = read_point(&backend, KEY_HOME).unwrap_or(default_home);
        let offset = read_point(&backend, KEY_OFFSET)
            .map(|p| p.to_vector())
            .unwrap_or_else(|| rig.calibration_offset(home));
        PositionStore {
            backend,
            rig,
            position,
            home,
            offset,
        }
    }

    pub fn rig(&self) -> &RigConfig {
        &self.rig
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn home(&self) -> Point {
        self.home
    }

    /// How far HOME is from the factory default. Only for display.
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// The current position, measured from HOME.
    pub fn relative_position(&self) -> Offset {
        self.position - self.home
    }

    pub fn save_position(&mut self, p: Point) {
        self.position = p;
        write_point(&self.backend, KEY_POSITION, p);
    }

    /// Moves HOME, and updates the calibration offset to match.
    pub fn save_home(&mut self, p: Point) {
        self.home = p;
        self.offset = self.rig.calibration_offset(p);
        write_point(&self.backend, KEY_HOME, p);
        write_point(&self.backend, KEY_OFFSET, self.offset.to_point());
    }

    /// Declares that wherever we are now is HOME.
    pub fn set_home_from_current(&mut self) -> Point {
        let p = self.position;
        self.save_home(p);
        p
    }

    /// Forgets any calibration, putting HOME back at the factory default.
    pub fn reset_calibration(&mut self) {
        self.home = self.rig.default_home();
        self.offset = Offset::zero();
        write_point(&self.backend, KEY_HOME, self.home);
        if let Err(e) = self.backend.remove(KEY_OFFSET) {
            warn!("failed to clear the saved {KEY_OFFSET}: {e}");
        }
    }
}
