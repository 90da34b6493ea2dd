//! 2D キーポイント列からリグのボーン回転を求めるリターゲットエンジン

pub mod calibration;
pub mod context;
pub mod filter;
pub mod gate;
pub mod rig;
pub mod solver;
pub mod transition;

pub use calibration::{CalibrationBaseline, CalibrationEvent, CalibrationTracker, HysteresisCounter};
pub use context::{FrameOutput, RetargetContext, RetargetEvent};
pub use filter::{KeypointFilter, Point, PoseSnapshot, Signal};
pub use gate::{BoneGroup, GateController, GateState};
pub use rig::{bones, BoneCommand, BoneState, Rig, RigApplier, RigBinding, TransitionId};
pub use solver::AxisAngle;
pub use transition::{Easing, TransitionRegistry};
