use super::types::{ProgressData, StartRequest, WireState};
use crate::registry::task::{LngLat, Projection, RemoteProgress, Task, TaskState};

/// Map a wire state tag to the task lifecycle
pub fn map_wire_state(state: WireState) -> TaskState {
    match state {
        WireState::Downloading => TaskState::Running,
        WireState::Paused => TaskState::Paused,
        WireState::Finished => TaskState::Completed,
        WireState::Errored => TaskState::Failed,
    }
}

pub fn map_progress(data: ProgressData) -> RemoteProgress {
    RemoteProgress {
        current: data.current,
        total: data.total,
        state: map_wire_state(data.state),
        failed_tiles: data.failed,
    }
}

fn corner(point: LngLat) -> [f64; 2] {
    [point.lng, point.lat]
}

pub fn to_start_request(task: &Task, projection: Projection) -> StartRequest {
    StartRequest {
        uuid: task.id.to_string(),
        kind: task.kind,
        zoom: task.level,
        projection,
        nw: corner(task.region.nw),
        ne: corner(task.region.ne),
        se: corner(task.region.se),
        sw: corner(task.region.sw),
    }
}
