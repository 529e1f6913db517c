//! JSON-lines session replay.
//!
//! One tick per line:
//!
//! ```json
//! {"timestamp": 33, "robot": {"x": 120.0, "y": 0.0, "theta": 0.0},
//!  "markers": [...], "events": [...], "delocalize": false}
//! ```
//!
//! Every field is optional.  Blank lines and lines starting with `#` are
//! skipped.

use std::io::BufRead;
use std::sync::mpsc;

use blockworld_frames::Transform3D;
use blockworld_types::{ObjectEvent, ObservedMarker, PoseState, TimestampMs, WorldError};
use blockworld_world::observer::WorldEvent;
use blockworld_world::{BlockWorld, ObjectFilter, RobotPoseUpdate, TickInput};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read session: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line}: {source}")]
    World { line: usize, source: WorldError },
}

/// Robot pose on the ground plane, millimetres and radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanarPose {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub theta: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReplayTick {
    #[serde(default)]
    pub timestamp: TimestampMs,
    #[serde(default)]
    pub robot: Option<PlanarPose>,
    #[serde(default)]
    pub markers: Vec<ObservedMarker>,
    #[serde(default)]
    pub events: Vec<ObjectEvent>,
    /// Start a new origin before this tick is applied.
    #[serde(default)]
    pub delocalize: bool,
}

impl ReplayTick {
    fn into_input(self) -> TickInput {
        TickInput {
            robot_pose: self.robot.map(|p| RobotPoseUpdate {
                timestamp: self.timestamp,
                pose: Transform3D::from_xyz_yaw(p.x, p.y, 0.0, p.theta),
            }),
            events: self.events,
            markers: self.markers,
        }
    }
}

/// A parsed tick and the session line it came from.
#[derive(Debug, Clone)]
pub struct NumberedTick {
    pub line: usize,
    pub tick: ReplayTick,
}

/// Parse every tick of a session, remembering line numbers.
pub fn parse_session(reader: impl BufRead) -> Result<Vec<NumberedTick>, ReplayError> {
    let mut ticks = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tick = serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
            line: idx + 1,
            source,
        })?;
        ticks.push(NumberedTick {
            line: idx + 1,
            tick,
        });
    }
    Ok(ticks)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub ticks: usize,
    pub created: usize,
    pub updated: usize,
    pub ignored_markers: usize,
    pub became_unknown: usize,
    pub evicted: usize,
    pub collided: usize,
    pub rejected_events: usize,
    pub delocalizations: usize,
    pub world_events: usize,
}

/// Feed every tick to `world`, logging each observer notification.
pub fn run(world: &mut BlockWorld, ticks: Vec<NumberedTick>) -> Result<ReplayReport, ReplayError> {
    let (tx, rx) = mpsc::channel::<WorldEvent>();
    world.set_observer(Box::new(tx));

    let mut report = ReplayReport::default();
    for NumberedTick { line, tick } in ticks {
        if tick.delocalize {
            world
                .delocalize()
                .map_err(|source| ReplayError::World { line, source })?;
            report.delocalizations += 1;
        }
        let summary = world
            .update(tick.into_input())
            .map_err(|source| ReplayError::World { line, source })?;

        report.ticks += 1;
        report.created += summary.observation.created.len();
        report.updated += summary.observation.updated.len();
        report.ignored_markers += summary.observation.ignored;
        report.became_unknown += summary.became_unknown.len();
        report.evicted += summary.evicted.len();
        report.collided += summary.collided.len();
        report.rejected_events += summary.rejected_events;

        for event in rx.try_iter() {
            report.world_events += 1;
            match serde_json::to_string(&event) {
                Ok(json) => debug!(tick = summary.tick, event = %json, "world event"),
                Err(_) => debug!(tick = summary.tick, ?event, "world event"),
            }
        }
    }
    info!(
        ticks = report.ticks,
        located = world.world().located_len(),
        "replay finished"
    );
    Ok(report)
}

fn state_label(state: PoseState) -> colored::ColoredString {
    match state {
        PoseState::Known => "known".green(),
        PoseState::Dirty => "dirty".yellow(),
        PoseState::Unknown => "unknown".red(),
    }
}

/// Human-readable report and world tables on stdout.
pub fn print_summary(world: &BlockWorld, report: &ReplayReport) {
    println!();
    println!("  {}", "Replay".bold().cyan());
    println!(
        "    ticks {}  created {}  updated {}  ignored {}",
        report.ticks, report.created, report.updated, report.ignored_markers
    );
    println!(
        "    unknown {}  evicted {}  collisions {}  rejected events {}  delocalized {}",
        report.became_unknown,
        report.evicted,
        report.collided,
        report.rejected_events,
        report.delocalizations
    );

    let current = world.current_origin();
    println!();
    println!(
        "  {} (current origin {})",
        "Located objects".bold().cyan(),
        current.to_string().bold()
    );
    let snapshot = world.world().snapshot();
    if snapshot.is_empty() {
        println!("    {}", "none".dimmed());
    }
    for obj in &snapshot {
        let t = obj.pose.translation;
        let origin = if obj.origin == current {
            obj.origin.to_string().normal()
        } else {
            obj.origin.to_string().dimmed()
        };
        println!(
            "    {:<10} {:<16} {:<10} {:<8} ({:>7.1}, {:>7.1}, {:>6.1}){}",
            obj.id.to_string().bold(),
            obj.object_type.to_string(),
            origin,
            state_label(obj.pose_state),
            t.x,
            t.y,
            t.z,
            if obj.is_carried { "  carried".magenta() } else { "".normal() }
        );
    }

    println!();
    println!("  {}", "Connected objects".bold().cyan());
    let connected = world
        .world()
        .find_connected_matching_objects(&ObjectFilter::new());
    if connected.is_empty() {
        println!("    {}", "none".dimmed());
    }
    for c in connected {
        println!(
            "    {:<10} {:<16} {:<10} {}{}",
            c.active_id.to_string().bold(),
            c.object_type.to_string(),
            c.object_id.to_string(),
            c.hw_address.dimmed(),
            if c.is_moving { "  moving".yellow() } else { "".normal() }
        );
    }
    println!();
}
