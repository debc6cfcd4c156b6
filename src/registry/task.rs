use crate::error::{TaskError, TaskResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Shortest identifier accepted from callers
pub const MIN_ID_LEN: usize = 16;

/// Opaque task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Fresh 32-character hex identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validate a caller-supplied identifier
    pub fn new(id: impl Into<String>) -> TaskResult<Self> {
        let id = id.into();
        if id.len() < MIN_ID_LEN || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TaskError::InvalidId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tile layer a task downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileKind {
    #[serde(rename = "img")]
    Imagery,
    #[serde(rename = "vec")]
    Vector,
}

impl TileKind {
    pub fn tag(&self) -> &'static str {
        match self {
            TileKind::Imagery => "img",
            TileKind::Vector => "vec",
        }
    }
}

impl fmt::Display for TileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileKind::Imagery => f.write_str("imagery"),
            TileKind::Vector => f.write_str("vector"),
        }
    }
}

impl std::str::FromStr for TileKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "img" | "imagery" => Ok(TileKind::Imagery),
            "vec" | "vector" => Ok(TileKind::Vector),
            other => Err(TaskError::Config(format!("unknown tile kind: {}", other))),
        }
    }
}

/// Map projection the downloader should fetch tiles in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    #[serde(rename = "EPSG:4326")]
    Epsg4326,
    #[serde(rename = "EPSG:3857")]
    Epsg3857,
}

impl Projection {
    pub fn code(&self) -> &'static str {
        match self {
            Projection::Epsg4326 => "EPSG:4326",
            Projection::Epsg3857 => "EPSG:3857",
        }
    }
}

/// Which part of a batch request was left empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionField {
    Kind,
    Level,
}

impl fmt::Display for SelectionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionField::Kind => f.write_str("tile kind"),
            SelectionField::Level => f.write_str("zoom level"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

/// Four-corner bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub nw: LngLat,
    pub ne: LngLat,
    pub se: LngLat,
    pub sw: LngLat,
}

impl Region {
    /// Build the corners from the south-west and north-east points of a selection
    pub fn from_bounds(sw: LngLat, ne: LngLat) -> Self {
        Self {
            nw: LngLat::new(sw.lng, ne.lat),
            ne,
            se: LngLat::new(ne.lng, sw.lat),
            sw,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.ne.lat >= self.sw.lat && self.ne.lng >= self.sw.lng
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A tile the downloader failed to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRef {
    pub zoom: u8,
    pub row: u64,
    pub col: u64,
}

/// What a caller asks for; the region comes from the active selection
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub id: Option<TaskId>,
    pub kind: TileKind,
    pub level: u8,
}

impl TaskSpec {
    pub fn new(kind: TileKind, level: u8) -> Self {
        Self { id: None, kind, level }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Progress as reported by the downloader
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProgress {
    pub current: u64,
    pub total: u64,
    pub state: TaskState,
    pub failed_tiles: Vec<TileRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TileKind,
    pub level: u8,
    pub region: Region,
    pub state: TaskState,
    pub current: u64,
    pub total: u64,
    pub failed_tiles: Vec<TileRef>,
    pub updated_at: SystemTime,
}

impl Task {
    pub fn new(id: TaskId, spec: &TaskSpec, region: Region) -> Self {
        Self {
            id,
            kind: spec.kind,
            level: spec.level,
            region,
            state: TaskState::Pending,
            current: 0,
            total: 0,
            failed_tiles: Vec::new(),
            updated_at: SystemTime::now(),
        }
    }

    /// Completed share of the work, once the total is known
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.current as f64 / self.total as f64)
    }

    pub fn percent(&self) -> f64 {
        self.fraction().map(|f| f * 100.0).unwrap_or(0.0)
    }

    pub fn begin(&mut self) -> TaskResult<()> {
        self.transition(TaskState::Pending, TaskState::Running, "start")
    }

    pub fn pause(&mut self) -> TaskResult<()> {
        self.transition(TaskState::Running, TaskState::Paused, "cancel")
    }

    pub fn resume(&mut self) -> TaskResult<()> {
        self.transition(TaskState::Paused, TaskState::Running, "resume")
    }

    /// Overwrite progress with the latest report. Only terminal remote
    /// states change the lifecycle.
    pub fn apply_progress(&mut self, progress: &RemoteProgress) {
        self.current = progress.current;
        self.total = progress.total;
        self.failed_tiles = progress.failed_tiles.clone();
        if progress.state.is_terminal() {
            self.state = progress.state;
        }
        self.updated_at = SystemTime::now();
    }

    fn transition(&mut self, from: TaskState, to: TaskState, operation: &'static str) -> TaskResult<()> {
        if self.state != from {
            return Err(TaskError::InvalidState {
                id: self.id.clone(),
                state: self.state,
                operation,
            });
        }
        self.state = to;
        self.updated_at = SystemTime::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::from_bounds(LngLat::new(116.0, 39.0), LngLat::new(117.0, 40.0))
    }

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_caller_ids_are_validated() {
        assert!(TaskId::new("a1b2c3d4e5f6a7b8").is_ok());
        assert!(matches!(TaskId::new("short"), Err(TaskError::InvalidId(_))));
        assert!(matches!(TaskId::new("has-a-dash-in-it-0"), Err(TaskError::InvalidId(_))));
    }

    #[test]
    fn test_region_from_bounds() {
        let r = region();
        assert_eq!(r.nw, LngLat::new(116.0, 40.0));
        assert_eq!(r.se, LngLat::new(117.0, 39.0));
        assert!(r.is_valid());

        let flipped = Region::from_bounds(LngLat::new(117.0, 40.0), LngLat::new(116.0, 39.0));
        assert!(!flipped.is_valid());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut task = Task::new(TaskId::generate(), &TaskSpec::new(TileKind::Imagery, 10), region());
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.pause().is_err());

        task.begin().unwrap();
        assert_eq!(task.state, TaskState::Running);
        assert!(task.resume().is_err());

        task.pause().unwrap();
        assert_eq!(task.state, TaskState::Paused);

        task.resume().unwrap();
        assert_eq!(task.state, TaskState::Running);
    }

    #[test]
    fn test_apply_progress_keeps_local_state_for_non_terminal_reports() {
        let mut task = Task::new(TaskId::generate(), &TaskSpec::new(TileKind::Vector, 5), region());
        task.begin().unwrap();

        task.apply_progress(&RemoteProgress {
            current: 3,
            total: 12,
            state: TaskState::Paused,
            failed_tiles: vec![],
        });
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.fraction(), Some(0.25));
        assert_eq!(task.percent(), 25.0);

        task.apply_progress(&RemoteProgress {
            current: 12,
            total: 12,
            state: TaskState::Completed,
            failed_tiles: vec![TileRef { zoom: 5, row: 1, col: 2 }],
        });
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.failed_tiles.len(), 1);
    }

    #[test]
    fn test_fraction_unknown_total() {
        let task = Task::new(TaskId::generate(), &TaskSpec::new(TileKind::Imagery, 1), region());
        assert_eq!(task.fraction(), None);
        assert_eq!(task.percent(), 0.0);
    }

    #[test]
    fn test_tile_kind_tags() {
        assert_eq!(serde_json::to_string(&TileKind::Imagery).unwrap(), "\"img\"");
        assert_eq!("vec".parse::<TileKind>().unwrap(), TileKind::Vector);
        assert!("satellite".parse::<TileKind>().is_err());
    }
}
